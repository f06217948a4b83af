use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::events::Role;

/// One scored, selectable player. Never mutated after the predictor emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub player_id: String,
    pub role: Role,
    pub score: f64,
    pub lo: f64,
    pub hi: f64,
    pub overseas: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SquadConstraints {
    pub squad_size: usize,
    /// Batters plus keepers.
    pub min_batting_options: usize,
    /// Bowlers plus all-rounders.
    pub min_bowling_options: usize,
    pub min_allrounders: usize,
    pub min_keepers: usize,
    pub max_keepers: usize,
    pub max_overseas: usize,
}

impl Default for SquadConstraints {
    fn default() -> Self {
        Self {
            squad_size: 11,
            min_batting_options: 5,
            min_bowling_options: 4,
            min_allrounders: 2,
            min_keepers: 1,
            max_keepers: 2,
            max_overseas: 4,
        }
    }
}

impl SquadConstraints {
    /// Validated once at load; malformed bounds never reach the solver.
    pub fn validate(&self) -> Result<()> {
        if self.squad_size == 0 {
            bail!("squad_size must be positive");
        }
        if self.min_keepers > self.max_keepers {
            bail!(
                "min_keepers ({}) exceeds max_keepers ({})",
                self.min_keepers,
                self.max_keepers
            );
        }
        // Batting and bowling option groups are disjoint role sets.
        if self.min_batting_options + self.min_bowling_options > self.squad_size {
            bail!(
                "role minimums ({} batting + {} bowling) exceed squad_size {}",
                self.min_batting_options,
                self.min_bowling_options,
                self.squad_size
            );
        }
        // All-rounders count toward the bowling-option group; a floor above
        // that group's own floor is a contradictory config, not a tighter one.
        if self.min_allrounders > self.min_bowling_options {
            bail!(
                "min_allrounders ({}) exceeds min_bowling_options ({})",
                self.min_allrounders,
                self.min_bowling_options
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Branch-and-bound ran to completion.
    Optimal,
    /// Timed out with a constraint-satisfying incumbent in hand.
    Feasible,
    /// Greedy top-score fallback; role quotas were NOT enforced.
    SuboptimalFallback,
    /// Pool smaller than the requested squad.
    InfeasibleInput,
}

impl SolveStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Optimal => "Optimal",
            Self::Feasible => "Feasible",
            Self::SuboptimalFallback => "Suboptimal-fallback",
            Self::InfeasibleInput => "Infeasible-input",
        }
    }

    /// Whether role quotas are guaranteed to hold for this result.
    pub fn quota_compliant(self) -> bool {
        matches!(self, Self::Optimal | Self::Feasible)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRow {
    pub player_id: String,
    pub role: Role,
    pub score: f64,
    pub lo: f64,
    pub hi: f64,
    pub chosen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub rows: Vec<SelectionRow>,
    pub status: SolveStatus,
    pub total_score: f64,
}

impl Selection {
    pub fn chosen(&self) -> impl Iterator<Item = &SelectionRow> {
        self.rows.iter().filter(|r| r.chosen)
    }
}

pub const DEFAULT_SOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pick exactly `squad_size` candidates maximizing total predicted score
/// under the role and eligibility constraints. Exact branch-and-bound with a
/// deterministic greedy fallback on timeout; see `SolveStatus` for the
/// degradation ladder.
pub fn select(
    candidates: &[Candidate],
    constraints: &SquadConstraints,
    timeout: Duration,
) -> Result<Selection> {
    constraints.validate()?;

    if candidates.len() < constraints.squad_size {
        tracing::warn!(
            pool = candidates.len(),
            squad_size = constraints.squad_size,
            "candidate pool smaller than squad; nothing to select"
        );
        return Ok(build_selection(candidates, &[], SolveStatus::InfeasibleInput));
    }

    // Stable order: score descending, id ascending. Both the search and the
    // fallback derive from this, keeping results reproducible.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .score
            .total_cmp(&candidates[a].score)
            .then_with(|| candidates[a].player_id.cmp(&candidates[b].player_id))
    });

    let mut search = Search::new(candidates, &order, constraints, timeout);
    search.run();

    if let Some(best) = search.best.take() {
        let status = if search.timed_out {
            SolveStatus::Feasible
        } else {
            SolveStatus::Optimal
        };
        return Ok(build_selection(candidates, &best.members, status));
    }

    // Infeasible or timed out empty-handed: greedy top-N by score keeps the
    // system available at the cost of quota compliance.
    let fallback: Vec<usize> = order[..constraints.squad_size].to_vec();
    tracing::warn!(
        timed_out = search.timed_out,
        "solver found no feasible squad; using greedy fallback"
    );
    Ok(build_selection(
        candidates,
        &fallback,
        SolveStatus::SuboptimalFallback,
    ))
}

#[derive(Debug, Clone)]
struct Incumbent {
    members: Vec<usize>,
    score: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    chosen: usize,
    batting_options: usize,
    bowling_options: usize,
    allrounders: usize,
    keepers: usize,
    overseas: usize,
    score: f64,
}

impl Counts {
    fn with(mut self, c: &Candidate) -> Self {
        self.chosen += 1;
        self.score += c.score;
        match c.role {
            Role::Batter => self.batting_options += 1,
            Role::Keeper => {
                self.batting_options += 1;
                self.keepers += 1;
            }
            Role::Bowler => self.bowling_options += 1,
            Role::AllRounder => {
                self.bowling_options += 1;
                self.allrounders += 1;
            }
        }
        if c.overseas {
            self.overseas += 1;
        }
        self
    }
}

struct Search<'a> {
    candidates: &'a [Candidate],
    order: &'a [usize],
    constraints: &'a SquadConstraints,
    deadline: Instant,
    timed_out: bool,
    best: Option<Incumbent>,
    // Suffix aggregates over the sorted order for pruning.
    suffix_score: Vec<f64>,
    suffix_bat: Vec<usize>,
    suffix_bowl: Vec<usize>,
    suffix_allr: Vec<usize>,
    suffix_wk: Vec<usize>,
    stack: Vec<usize>,
}

impl<'a> Search<'a> {
    fn new(
        candidates: &'a [Candidate],
        order: &'a [usize],
        constraints: &'a SquadConstraints,
        timeout: Duration,
    ) -> Self {
        let n = order.len();
        let mut suffix_score = vec![0.0; n + 1];
        let mut suffix_bat = vec![0; n + 1];
        let mut suffix_bowl = vec![0; n + 1];
        let mut suffix_allr = vec![0; n + 1];
        let mut suffix_wk = vec![0; n + 1];
        for pos in (0..n).rev() {
            let c = &candidates[order[pos]];
            suffix_score[pos] = suffix_score[pos + 1] + c.score;
            suffix_bat[pos] = suffix_bat[pos + 1]
                + usize::from(matches!(c.role, Role::Batter | Role::Keeper));
            suffix_bowl[pos] = suffix_bowl[pos + 1]
                + usize::from(matches!(c.role, Role::Bowler | Role::AllRounder));
            suffix_allr[pos] = suffix_allr[pos + 1] + usize::from(c.role == Role::AllRounder);
            suffix_wk[pos] = suffix_wk[pos + 1] + usize::from(c.role == Role::Keeper);
        }
        Self {
            candidates,
            order,
            constraints,
            deadline: Instant::now() + timeout,
            timed_out: false,
            best: None,
            suffix_score,
            suffix_bat,
            suffix_bowl,
            suffix_allr,
            suffix_wk,
            stack: Vec::with_capacity(constraints.squad_size),
        }
    }

    fn run(&mut self) {
        self.visit(0, Counts::default());
    }

    fn visit(&mut self, pos: usize, counts: Counts) {
        if self.timed_out {
            return;
        }
        if Instant::now() >= self.deadline {
            self.timed_out = true;
            return;
        }

        let k = self.constraints;
        if counts.chosen == k.squad_size {
            if self.satisfies_minimums(&counts)
                && self
                    .best
                    .as_ref()
                    .is_none_or(|b| counts.score > b.score + 1e-12)
            {
                self.best = Some(Incumbent {
                    members: self.stack.clone(),
                    score: counts.score,
                });
            }
            return;
        }
        if pos == self.order.len() {
            return;
        }

        let remaining = self.order.len() - pos;
        let slots = k.squad_size - counts.chosen;
        if remaining < slots {
            return;
        }

        // Role-group feasibility: each unmet minimum must be coverable by the
        // remaining pool, and the two disjoint groups must fit the open slots.
        let need_bat = k.min_batting_options.saturating_sub(counts.batting_options);
        let need_bowl = k.min_bowling_options.saturating_sub(counts.bowling_options);
        let need_allr = k.min_allrounders.saturating_sub(counts.allrounders);
        let need_wk = k.min_keepers.saturating_sub(counts.keepers);
        if need_bat > self.suffix_bat[pos]
            || need_bowl > self.suffix_bowl[pos]
            || need_allr > self.suffix_allr[pos]
            || need_wk > self.suffix_wk[pos]
            || need_bat + need_bowl > slots
        {
            return;
        }

        // Optimistic bound: current score plus the best `slots` scores left.
        let bound = counts.score + self.suffix_score[pos]
            - self.suffix_score[(pos + slots).min(self.order.len())];
        if let Some(best) = &self.best
            && bound <= best.score + 1e-12
        {
            return;
        }

        let idx = self.order[pos];
        let c = &self.candidates[idx];
        let keeper_ok = c.role != Role::Keeper || counts.keepers < k.max_keepers;
        let overseas_ok = !c.overseas || counts.overseas < k.max_overseas;

        if keeper_ok && overseas_ok {
            self.stack.push(idx);
            self.visit(pos + 1, counts.with(c));
            self.stack.pop();
        }
        self.visit(pos + 1, counts);
    }

    fn satisfies_minimums(&self, counts: &Counts) -> bool {
        let k = self.constraints;
        counts.batting_options >= k.min_batting_options
            && counts.bowling_options >= k.min_bowling_options
            && counts.allrounders >= k.min_allrounders
            && counts.keepers >= k.min_keepers
            && counts.keepers <= k.max_keepers
            && counts.overseas <= k.max_overseas
    }
}

fn build_selection(candidates: &[Candidate], members: &[usize], status: SolveStatus) -> Selection {
    let mut rows: Vec<SelectionRow> = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| SelectionRow {
            player_id: c.player_id.clone(),
            role: c.role,
            score: c.score,
            lo: c.lo,
            hi: c.hi,
            chosen: members.contains(&idx),
        })
        .collect();
    // Chosen XI first in role order, then the bench by score.
    rows.sort_by(|a, b| {
        b.chosen
            .cmp(&a.chosen)
            .then_with(|| {
                if a.chosen {
                    a.role.display_rank().cmp(&b.role.display_rank())
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    let total_score = rows.iter().filter(|r| r.chosen).map(|r| r.score).sum();
    Selection {
        rows,
        status,
        total_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, role: Role, score: f64) -> Candidate {
        Candidate {
            player_id: id.to_string(),
            role,
            score,
            lo: score * 0.85,
            hi: score * 1.15,
            overseas: false,
        }
    }

    fn small_pool() -> Vec<Candidate> {
        vec![
            cand("bat1", Role::Batter, 90.0),
            cand("bat2", Role::Batter, 70.0),
            cand("bat3", Role::Batter, 60.0),
            cand("wk1", Role::Keeper, 65.0),
            cand("all1", Role::AllRounder, 75.0),
            cand("bowl1", Role::Bowler, 80.0),
            cand("bowl2", Role::Bowler, 55.0),
        ]
    }

    fn small_constraints() -> SquadConstraints {
        SquadConstraints {
            squad_size: 5,
            min_batting_options: 2,
            min_bowling_options: 2,
            min_allrounders: 1,
            min_keepers: 1,
            max_keepers: 1,
            max_overseas: 2,
        }
    }

    #[test]
    fn picks_exact_size_and_honors_minimums() {
        let sel = select(&small_pool(), &small_constraints(), DEFAULT_SOLVE_TIMEOUT).unwrap();
        assert_eq!(sel.status, SolveStatus::Optimal);
        assert_eq!(sel.chosen().count(), 5);
        assert!(sel.chosen().filter(|r| r.role == Role::Keeper).count() >= 1);
        assert!(
            sel.chosen()
                .filter(|r| matches!(r.role, Role::Bowler | Role::AllRounder))
                .count()
                >= 2
        );
    }

    #[test]
    fn short_pool_is_infeasible_input() {
        let pool = vec![cand("a", Role::Batter, 50.0)];
        let sel = select(&pool, &small_constraints(), DEFAULT_SOLVE_TIMEOUT).unwrap();
        assert_eq!(sel.status, SolveStatus::InfeasibleInput);
        assert_eq!(sel.chosen().count(), 0);
        assert_eq!(sel.total_score, 0.0);
    }

    #[test]
    fn unmeetable_quota_falls_back_to_greedy() {
        // No keeper in the pool at all.
        let pool: Vec<Candidate> = (0..6)
            .map(|i| cand(&format!("bat{i}"), Role::Batter, 50.0 + i as f64))
            .collect();
        let sel = select(&pool, &small_constraints(), DEFAULT_SOLVE_TIMEOUT).unwrap();
        assert_eq!(sel.status, SolveStatus::SuboptimalFallback);
        assert!(!sel.status.quota_compliant());
        assert_eq!(sel.chosen().count(), 5);
        // Greedy keeps the top scores.
        assert!(sel.chosen().all(|r| r.score >= 51.0));
    }

    #[test]
    fn select_is_deterministic_under_score_ties() {
        let mut pool = small_pool();
        for c in &mut pool {
            c.score = 60.0;
        }
        let a = select(&pool, &small_constraints(), DEFAULT_SOLVE_TIMEOUT).unwrap();
        let b = select(&pool, &small_constraints(), DEFAULT_SOLVE_TIMEOUT).unwrap();
        let ids = |s: &Selection| -> Vec<String> {
            s.rows.iter().map(|r| r.player_id.clone()).collect()
        };
        assert_eq!(ids(&a), ids(&b));
        let chosen_a: Vec<bool> = a.rows.iter().map(|r| r.chosen).collect();
        let chosen_b: Vec<bool> = b.rows.iter().map(|r| r.chosen).collect();
        assert_eq!(chosen_a, chosen_b);
    }

    #[test]
    fn overseas_cap_is_enforced() {
        let mut pool = small_pool();
        pool.push(cand("bat4", Role::Batter, 95.0));
        pool.push(cand("bat5", Role::Batter, 94.0));
        pool.push(cand("bat6", Role::Batter, 93.0));
        for c in pool.iter_mut() {
            if c.role == Role::Batter {
                c.overseas = true;
            }
        }
        let mut k = small_constraints();
        k.max_overseas = 1;
        let sel = select(&pool, &k, DEFAULT_SOLVE_TIMEOUT).unwrap();
        assert_eq!(sel.status, SolveStatus::Optimal);
        let overseas_chosen = sel
            .chosen()
            .filter(|r| pool.iter().any(|c| c.player_id == r.player_id && c.overseas))
            .count();
        assert_eq!(overseas_chosen, 1);
    }

    #[test]
    fn malformed_constraints_fail_fast() {
        let mut k = small_constraints();
        k.min_keepers = 3;
        let err = select(&small_pool(), &k, DEFAULT_SOLVE_TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("min_keepers"));
    }

    #[test]
    fn allrounder_floor_above_bowling_floor_is_rejected() {
        let mut k = small_constraints();
        k.min_allrounders = k.min_bowling_options + 1;
        let err = select(&small_pool(), &k, DEFAULT_SOLVE_TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("min_allrounders"));
    }
}
