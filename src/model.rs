use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;

pub type FeatureRow = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Depth-limited CART regression tree with variance-reduction splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl RegressionTree {
    fn fit(
        rows: &[FeatureRow],
        targets: &[f64],
        indices: &[usize],
        features: &[usize],
        params: TreeParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(rows, targets, indices, features, params, 0);
        tree
    }

    fn grow(
        &mut self,
        rows: &[FeatureRow],
        targets: &[f64],
        indices: &[usize],
        features: &[usize],
        params: TreeParams,
        depth: usize,
    ) -> usize {
        let mean = mean_of(targets, indices);
        if depth >= params.max_depth || indices.len() < params.min_samples_leaf * 2 {
            return self.push_leaf(mean);
        }

        let Some(split) = best_split(rows, targets, indices, features, params.min_samples_leaf)
        else {
            return self.push_leaf(mean);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| rows[i][split.feature] <= split.threshold);

        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean }); // placeholder
        let left = self.grow(rows, targets, &left_idx, features, params, depth + 1);
        let right = self.grow(rows, targets, &right_idx, features, params, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    fn push_leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    pub fn predict(&self, row: &FeatureRow) -> f64 {
        let mut at = 0usize;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    cost: f64,
}

/// Scan each allowed feature for the threshold minimizing the summed squared
/// error of the two children. Features are scanned in declaration order so
/// the result is deterministic.
fn best_split(
    rows: &[FeatureRow],
    targets: &[f64],
    indices: &[usize],
    features: &[usize],
    min_leaf: usize,
) -> Option<SplitChoice> {
    let n = indices.len();
    let sum: f64 = indices.iter().map(|&i| targets[i]).sum();
    let sum_sq: f64 = indices.iter().map(|&i| targets[i] * targets[i]).sum();
    let parent_cost = sum_sq - sum * sum / n as f64;

    let mut best: Option<SplitChoice> = None;
    let mut scratch: Vec<(f64, f64)> = Vec::with_capacity(n);

    for &feature in features {
        scratch.clear();
        scratch.extend(indices.iter().map(|&i| (rows[i][feature], targets[i])));
        scratch.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 1..n {
            let (value, y) = scratch[pos - 1];
            left_sum += y;
            left_sq += y * y;
            if pos < min_leaf || n - pos < min_leaf {
                continue;
            }
            // No valid threshold between equal values.
            if scratch[pos].0 <= value {
                continue;
            }
            let right_sum = sum - left_sum;
            let right_sq = sum_sq - left_sq;
            let cost = (left_sq - left_sum * left_sum / pos as f64)
                + (right_sq - right_sum * right_sum / (n - pos) as f64);
            if cost + 1e-12 < best.as_ref().map_or(parent_cost, |b| b.cost) {
                best = Some(SplitChoice {
                    feature,
                    threshold: (value + scratch[pos].0) / 2.0,
                    cost,
                });
            }
        }
    }
    best
}

fn mean_of(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

#[derive(Debug, Clone, Copy)]
pub struct BoostParams {
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_trees: 150,
            learning_rate: 0.08,
            max_depth: 4,
            min_samples_leaf: 10,
        }
    }
}

/// Gradient-boosted trees: each stage fits the residual of the running
/// prediction, scaled by the learning rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoost {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoost {
    pub fn fit(rows: &[FeatureRow], targets: &[f64], params: BoostParams) -> Self {
        let indices: Vec<usize> = (0..rows.len()).collect();
        let features: Vec<usize> = (0..FEATURE_COUNT).collect();
        let base = mean_of(targets, &indices);

        let mut preds = vec![base; rows.len()];
        let mut trees = Vec::with_capacity(params.n_trees);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
        };

        for _ in 0..params.n_trees {
            let residuals: Vec<f64> = targets
                .iter()
                .zip(&preds)
                .map(|(y, p)| y - p)
                .collect();
            let tree = RegressionTree::fit(rows, &residuals, &indices, &features, tree_params);
            for (i, pred) in preds.iter_mut().enumerate() {
                *pred += params.learning_rate * tree.predict(&rows[i]);
            }
            trees.push(tree);
        }

        Self {
            base,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn predict(&self, row: &FeatureRow) -> f64 {
        self.base
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|t| t.predict(row))
                    .sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_leaf: 5,
            seed: 42,
        }
    }
}

/// Bagged forest: bootstrap rows plus sqrt feature subsampling per tree.
/// Per-tree RNGs are derived from the seed and tree index, so training is
/// deterministic even when trees are grown in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedForest {
    trees: Vec<RegressionTree>,
}

impl BaggedForest {
    pub fn fit(rows: &[FeatureRow], targets: &[f64], params: ForestParams) -> Self {
        let n = rows.len();
        let n_features = (FEATURE_COUNT as f64).sqrt().ceil() as usize;
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
        };

        let trees: Vec<RegressionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(tree_idx as u64));
                let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

                let mut pool: Vec<usize> = (0..FEATURE_COUNT).collect();
                let mut features = Vec::with_capacity(n_features);
                for _ in 0..n_features {
                    let pick = rng.gen_range(0..pool.len());
                    features.push(pool.swap_remove(pick));
                }
                features.sort_unstable();

                RegressionTree::fit(rows, targets, &indices, &features, tree_params)
            })
            .collect();

        Self { trees }
    }

    pub fn predict(&self, row: &FeatureRow) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }
}
