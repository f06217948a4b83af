use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::events::{Discipline, InningsEvent, MatchFormat, PitchType};

/// Per player-match training label: batting and bowling contributions folded
/// into one number, normalised 0-100 within each format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactRow {
    pub player_id: String,
    pub match_id: String,
    pub format: MatchFormat,
    pub date: NaiveDate,
    pub venue: String,
    pub opponent: String,
    pub pitch: PitchType,
    pub bat_score: f64,
    pub bowl_score: f64,
    pub impact: f64,
}

pub fn impact_scores(events: &[InningsEvent]) -> Vec<ImpactRow> {
    #[derive(Default)]
    struct Totals {
        bat_runs: u64,
        bat_balls: u64,
        bowl_runs: u64,
        bowl_balls: u64,
        wickets: u64,
    }

    let mut per_match: HashMap<(String, String), (Totals, MatchFormat, NaiveDate, String, String, PitchType)> =
        HashMap::new();
    for ev in events {
        let slot = per_match
            .entry((ev.player_id.clone(), ev.match_id.clone()))
            .or_insert_with(|| {
                (
                    Totals::default(),
                    ev.format,
                    ev.date,
                    ev.venue.clone(),
                    ev.opponent.clone(),
                    ev.pitch,
                )
            });
        match ev.discipline {
            Discipline::Batting => {
                slot.0.bat_runs += ev.runs as u64;
                slot.0.bat_balls += ev.balls as u64;
            }
            Discipline::Bowling => {
                slot.0.bowl_runs += ev.runs as u64;
                slot.0.bowl_balls += ev.balls as u64;
                slot.0.wickets += ev.wickets as u64;
            }
        }
    }

    let mut rows: Vec<ImpactRow> = per_match
        .into_iter()
        .map(|((player_id, match_id), (t, format, date, venue, opponent, pitch))| {
            let bench = format.benchmark();

            let bat_score = if t.bat_balls > 0 {
                let sr = t.bat_runs as f64 / t.bat_balls as f64 * 100.0;
                (t.bat_runs as f64 + (sr - bench.avg_strike_rate) * 0.2).max(0.0)
            } else {
                0.0
            };

            let bowl_score = if t.bowl_balls > 0 {
                let overs = t.bowl_balls as f64 / 6.0;
                let eco = t.bowl_runs as f64 / overs.max(1e-9);
                (t.wickets as f64 * 25.0 + (bench.avg_economy - eco) * overs).max(0.0)
            } else {
                0.0
            };

            ImpactRow {
                player_id,
                match_id,
                format,
                date,
                venue,
                opponent,
                pitch,
                bat_score,
                bowl_score,
                impact: 0.0,
            }
        })
        .collect();

    // Normalise within format between the 1% and 99% quantiles of raw impact.
    let mut by_format: HashMap<MatchFormat, Vec<f64>> = HashMap::new();
    for row in &rows {
        by_format
            .entry(row.format)
            .or_default()
            .push(row.bat_score + row.bowl_score);
    }
    let bounds: HashMap<MatchFormat, (f64, f64)> = by_format
        .into_iter()
        .map(|(fmt, mut vals)| {
            vals.sort_by(|a, b| a.total_cmp(b));
            let lo = quantile(&vals, 0.01);
            let hi = quantile(&vals, 0.99);
            (fmt, (lo, hi))
        })
        .collect();

    for row in &mut rows {
        let (lo, hi) = bounds[&row.format];
        let raw = row.bat_score + row.bowl_score;
        row.impact = ((raw - lo) / (hi - lo + 1e-9)).clamp(0.0, 1.0) * 100.0;
    }

    rows.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.match_id.cmp(&b.match_id))
            .then_with(|| b.impact.total_cmp(&a.impact))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    rows
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    if idx + 1 < sorted.len() {
        sorted[idx] * (1.0 - frac) + sorted[idx + 1] * frac
    } else {
        sorted[idx]
    }
}
