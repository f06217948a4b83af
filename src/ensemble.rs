use std::fs;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_NAMES, FeatureVector, check_feature_contract};
use crate::model::{BaggedForest, FeatureRow, GradientBoost};

/// Symmetric band width as a fraction of the score. A deliberate
/// simplification, not a probabilistic interval.
pub const UNCERTAINTY_PCT: f64 = 0.15;

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: f64,
    pub lo: f64,
    pub hi: f64,
}

pub fn rmse(preds: &[f64], truth: &[f64]) -> f64 {
    if preds.is_empty() || preds.len() != truth.len() {
        return f64::INFINITY;
    }
    let sse: f64 = preds
        .iter()
        .zip(truth)
        .map(|(p, y)| (p - y) * (p - y))
        .sum();
    (sse / preds.len() as f64).sqrt()
}

/// Scan w in {0.00, 0.01, .., 1.00} minimizing RMSE of
/// `w * a + (1 - w) * b` against the validation labels. Ties break toward
/// the midpoint.
pub fn fit_blend_weight(preds_a: &[f64], preds_b: &[f64], truth: &[f64]) -> f64 {
    let mut best_w = 0.5;
    let mut best_rmse = f64::INFINITY;
    for step in 0..=100 {
        let w = step as f64 / 100.0;
        let blend: Vec<f64> = preds_a
            .iter()
            .zip(preds_b)
            .map(|(a, b)| w * a + (1.0 - w) * b)
            .collect();
        let err = rmse(&blend, truth);
        let better = err + 1e-12 < best_rmse
            || ((err - best_rmse).abs() <= 1e-12 && (w - 0.5).abs() < (best_w - 0.5_f64).abs());
        if better {
            best_rmse = err;
            best_w = w;
        }
    }
    best_w
}

/// Expanding-window folds over rows already sorted by date: each fold trains
/// on everything before its validation slice, so no later-dated row ever
/// trains a model scored on an earlier-dated one.
pub fn forward_chain_folds(n: usize, n_folds: usize) -> Vec<(Range<usize>, Range<usize>)> {
    let n_folds = n_folds.max(1);
    let chunk = n / (n_folds + 1);
    if chunk == 0 {
        return Vec::new();
    }
    (1..=n_folds)
        .map(|fold| {
            let split = chunk * fold;
            let end = if fold == n_folds { n } else { chunk * (fold + 1) };
            (0..split, split..end)
        })
        .collect()
}

#[derive(Debug)]
pub struct Ensemble {
    pub boost: GradientBoost,
    pub forest: BaggedForest,
    pub blend_weight: f64,
    pub uncertainty_pct: f64,
}

impl Ensemble {
    /// Score a batch. The two regressors are independent; they are evaluated
    /// on separate rayon tasks and blended after both finish.
    pub fn predict(&self, vectors: &[FeatureVector]) -> Vec<Prediction> {
        let rows: Vec<FeatureRow> = vectors.iter().map(|fv| fv.values).collect();
        let (boost_scores, forest_scores): (Vec<f64>, Vec<f64>) = rayon::join(
            || rows.iter().map(|r| self.boost.predict(r)).collect(),
            || rows.iter().map(|r| self.forest.predict(r)).collect(),
        );

        boost_scores
            .iter()
            .zip(&forest_scores)
            .map(|(a, b)| {
                let raw = self.blend_weight * a + (1.0 - self.blend_weight) * b;
                let score = raw.clamp(0.0, 100.0);
                let margin = self.uncertainty_pct * score;
                Prediction {
                    score,
                    lo: (score - margin).max(0.0),
                    hi: score + margin,
                }
            })
            .collect()
    }
}

/// Serialized regressor state plus the metadata contract shared between
/// training and inference.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub generated_at: String,
    pub blend_weight: f64,
    pub uncertainty_pct: f64,
    pub feature_names: Vec<String>,
    pub train_date_start: String,
    pub train_date_end: String,
    pub boost: GradientBoost,
    pub forest: BaggedForest,
}

impl ModelArtifact {
    pub fn new(
        boost: GradientBoost,
        forest: BaggedForest,
        blend_weight: f64,
        train_date_start: String,
        train_date_end: String,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            blend_weight,
            uncertainty_pct: UNCERTAINTY_PCT,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            train_date_start,
            train_date_end,
            boost,
            forest,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let json = serde_json::to_string(self).context("serialize model artifact")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("write model artifact {}", tmp.display()))?;
        fs::rename(&tmp, path).context("swap model artifact")?;
        Ok(())
    }

    /// Load and verify the feature-name contract against the compiled list.
    /// A mismatch is fatal: a differently shaped vector must never reach a
    /// fixed-input-width regressor.
    pub fn load(path: &Path) -> Result<Ensemble> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read model artifact {}", path.display()))?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("parse model artifact {}", path.display()))?;
        check_feature_contract(&artifact.feature_names)
            .with_context(|| format!("model artifact {} rejected", path.display()))?;
        Ok(Ensemble {
            boost: artifact.boost,
            forest: artifact.forest,
            blend_weight: artifact.blend_weight,
            uncertainty_pct: artifact.uncertainty_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_weight_never_beats_both_singles_on_validation() {
        // b is the better model; the blend must be at least as good as it.
        let truth: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let a: Vec<f64> = truth.iter().map(|y| y + 8.0).collect();
        let b: Vec<f64> = truth.iter().map(|y| y + 1.0).collect();
        let w = fit_blend_weight(&a, &b, &truth);
        let blend: Vec<f64> = a
            .iter()
            .zip(&b)
            .map(|(x, y)| w * x + (1.0 - w) * y)
            .collect();
        let blend_rmse = rmse(&blend, &truth);
        assert!(blend_rmse <= rmse(&a, &truth) + 1e-9);
        assert!(blend_rmse <= rmse(&b, &truth) + 1e-9);
    }

    #[test]
    fn identical_models_tie_toward_midpoint() {
        let truth = vec![10.0, 20.0, 30.0];
        let preds = vec![12.0, 19.0, 33.0];
        let w = fit_blend_weight(&preds, &preds, &truth);
        assert!((w - 0.5).abs() < 1e-12);
    }

    #[test]
    fn forward_chain_folds_never_leak_forward() {
        let folds = forward_chain_folds(100, 5);
        assert_eq!(folds.len(), 5);
        for (train, val) in &folds {
            assert_eq!(train.start, 0);
            assert!(train.end <= val.start);
            assert!(!val.is_empty());
        }
        assert_eq!(folds.last().map(|f| f.1.end), Some(100));
    }

    #[test]
    fn folds_degenerate_gracefully_on_tiny_inputs() {
        assert!(forward_chain_folds(3, 5).is_empty());
    }
}
