use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::events::{Discipline, InningsEvent, MatchFormat, PitchType};

pub const FORM_SHORT_WINDOW: usize = 5;
pub const FORM_LONG_WINDOW: usize = 15;
pub const DECAY_HALF_LIFE_DAYS: u32 = 180;
pub const MIN_BATTING_INNINGS: usize = 5;
pub const MIN_BOWLING_INNINGS: usize = 5;
pub const MIN_OPPONENT_INNINGS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct AggregateParams {
    pub short_window: usize,
    pub long_window: usize,
    pub half_life_days: u32,
    pub min_batting_innings: usize,
    pub min_bowling_innings: usize,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self {
            short_window: FORM_SHORT_WINDOW,
            long_window: FORM_LONG_WINDOW,
            half_life_days: DECAY_HALF_LIFE_DAYS,
            min_batting_innings: MIN_BATTING_INNINGS,
            min_bowling_innings: MIN_BOWLING_INNINGS,
        }
    }
}

/// Recency weight in (0, 1]: 1.0 for events on (or after) the reference date,
/// halving every `half_life_days`.
pub fn decay_weight(event_date: NaiveDate, reference_date: NaiveDate, half_life_days: u32) -> f64 {
    let days_ago = (reference_date - event_date).num_days().max(0) as f64;
    (-std::f64::consts::LN_2 * days_ago / half_life_days.max(1) as f64).exp()
}

/// One row per player x format: career, windowed, and decay-weighted batting
/// metrics, plus per-pitch strike rates where observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BattingProfile {
    pub player_id: String,
    pub format: MatchFormat,
    pub innings: usize,
    pub career_runs: u64,
    pub career_avg: f64,
    pub career_sr: f64,
    pub form_avg_short: f64,
    pub form_sr_short: f64,
    pub form_avg_long: f64,
    pub form_sr_long: f64,
    pub weighted_avg: f64,
    pub weighted_sr: f64,
    /// Indexed by `PitchType::index`. `None` means never batted on that surface.
    pub sr_by_pitch: [Option<f64>; 5],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BowlingProfile {
    pub player_id: String,
    pub format: MatchFormat,
    pub innings: usize,
    pub career_wickets: u64,
    pub career_avg: f64,
    pub career_economy: f64,
    pub career_strike_rate: f64,
    pub form_eco_short: f64,
    pub form_eco_long: f64,
    pub weighted_avg: f64,
    pub weighted_economy: f64,
    pub eco_by_pitch: [Option<f64>; 5],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenueProfile {
    pub venue: String,
    pub format: MatchFormat,
    pub matches: usize,
    pub avg_innings_runs: f64,
}

/// Per player x format x opponent side record. Either discipline may be
/// absent when the player has too few innings against that side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpponentProfile {
    pub player_id: String,
    pub format: MatchFormat,
    pub opponent: String,
    pub bat_innings: usize,
    pub bat_avg: Option<f64>,
    pub bat_sr: Option<f64>,
    pub bowl_innings: usize,
    pub bowl_economy: Option<f64>,
    pub bowl_avg: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOutput {
    pub batting: Vec<BattingProfile>,
    pub bowling: Vec<BowlingProfile>,
    pub venues: Vec<VenueProfile>,
    pub opponents: Vec<OpponentProfile>,
}

/// One merged contest row: all of a player's innings events for one match and
/// discipline collapsed into totals.
#[derive(Debug, Clone)]
struct ContestRow {
    match_id: String,
    date: NaiveDate,
    pitch: PitchType,
    opponent: String,
    runs: u64,
    balls: u64,
    wickets: u64,
}

/// Full rebuild from the event log. Pure function of the log and the
/// reference date; running it twice yields identical output.
pub fn aggregate(
    events: &[InningsEvent],
    reference_date: NaiveDate,
    params: &AggregateParams,
) -> AggregateOutput {
    let mut partitions: HashMap<(String, MatchFormat, Discipline), Vec<&InningsEvent>> =
        HashMap::new();
    for ev in events {
        partitions
            .entry((ev.player_id.clone(), ev.format, ev.discipline))
            .or_default()
            .push(ev);
    }

    let mut keys: Vec<(String, MatchFormat, Discipline)> = partitions.keys().cloned().collect();
    keys.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.label().cmp(b.1.label())).then(a.2.cmp(&b.2)));

    // Partitions are independent; parallelism here is throughput only.
    let profiles: Vec<(BattingView, BowlingView)> = keys
        .par_iter()
        .map(|key| {
            let rows = contest_rows(&partitions[key]);
            match key.2 {
                Discipline::Batting => (
                    batting_profile(&key.0, key.1, &rows, reference_date, params),
                    None,
                ),
                Discipline::Bowling => (
                    None,
                    bowling_profile(&key.0, key.1, &rows, reference_date, params),
                ),
            }
        })
        .collect();

    let mut out = AggregateOutput::default();
    for (bat, bowl) in profiles {
        if let Some(p) = bat {
            out.batting.push(p);
        }
        if let Some(p) = bowl {
            out.bowling.push(p);
        }
    }
    out.venues = venue_profiles(events);
    out.opponents = opponent_profiles(&partitions, &mut keys);
    out
}

type BattingView = Option<BattingProfile>;
type BowlingView = Option<BowlingProfile>;

fn contest_rows(events: &[&InningsEvent]) -> Vec<ContestRow> {
    let mut sorted: Vec<&InningsEvent> = events.to_vec();
    sorted.sort_by(|a, b| InningsEvent::chronological(a, b));

    let mut rows: Vec<ContestRow> = Vec::new();
    for ev in sorted {
        match rows.last_mut() {
            Some(row) if row.match_id == ev.match_id => {
                row.runs += ev.runs as u64;
                row.balls += ev.balls as u64;
                row.wickets += ev.wickets as u64;
            }
            _ => rows.push(ContestRow {
                match_id: ev.match_id.clone(),
                date: ev.date,
                pitch: ev.pitch,
                opponent: ev.opponent.clone(),
                runs: ev.runs as u64,
                balls: ev.balls as u64,
                wickets: ev.wickets as u64,
            }),
        }
    }
    rows
}

fn batting_profile(
    player_id: &str,
    format: MatchFormat,
    rows: &[ContestRow],
    reference_date: NaiveDate,
    params: &AggregateParams,
) -> Option<BattingProfile> {
    // Absence, not a zero row, signals insufficient sample.
    if rows.len() < params.min_batting_innings {
        return None;
    }

    let runs: u64 = rows.iter().map(|r| r.runs).sum();
    let balls: u64 = rows.iter().map(|r| r.balls).sum();
    let outs: u64 = rows.iter().map(|r| r.wickets).sum();

    let short = trailing(rows, params.short_window);
    let long = trailing(rows, params.long_window);

    // Decay enters as a per-row multiplier before summation; ratios divide
    // weighted numerator by weighted denominator.
    let mut w_runs = 0.0;
    let mut w_balls = 0.0;
    let mut w_outs = 0.0;
    for row in rows {
        let w = decay_weight(row.date, reference_date, params.half_life_days);
        w_runs += row.runs as f64 * w;
        w_balls += row.balls as f64 * w;
        w_outs += row.wickets as f64 * w;
    }

    let mut sr_by_pitch = [None; 5];
    for pitch in PitchType::ALL {
        let (p_runs, p_balls): (u64, u64) = rows
            .iter()
            .filter(|r| r.pitch == pitch)
            .fold((0, 0), |acc, r| (acc.0 + r.runs, acc.1 + r.balls));
        if p_balls > 0 {
            sr_by_pitch[pitch.index()] = Some(strike_rate(p_runs as f64, p_balls as f64));
        }
    }

    Some(BattingProfile {
        player_id: player_id.to_string(),
        format,
        innings: rows.len(),
        career_runs: runs,
        career_avg: ratio(runs as f64, outs as f64),
        career_sr: strike_rate(runs as f64, balls as f64),
        form_avg_short: ratio(sum_runs(short) as f64, sum_wickets(short) as f64),
        form_sr_short: strike_rate(sum_runs(short) as f64, sum_balls(short) as f64),
        form_avg_long: ratio(sum_runs(long) as f64, sum_wickets(long) as f64),
        form_sr_long: strike_rate(sum_runs(long) as f64, sum_balls(long) as f64),
        weighted_avg: ratio(w_runs, w_outs),
        weighted_sr: strike_rate(w_runs, w_balls),
        sr_by_pitch,
    })
}

fn bowling_profile(
    player_id: &str,
    format: MatchFormat,
    rows: &[ContestRow],
    reference_date: NaiveDate,
    params: &AggregateParams,
) -> Option<BowlingProfile> {
    if rows.len() < params.min_bowling_innings {
        return None;
    }

    let runs: u64 = rows.iter().map(|r| r.runs).sum();
    let balls: u64 = rows.iter().map(|r| r.balls).sum();
    let wickets: u64 = rows.iter().map(|r| r.wickets).sum();

    let short = trailing(rows, params.short_window);
    let long = trailing(rows, params.long_window);

    let mut w_runs = 0.0;
    let mut w_balls = 0.0;
    let mut w_wickets = 0.0;
    for row in rows {
        let w = decay_weight(row.date, reference_date, params.half_life_days);
        w_runs += row.runs as f64 * w;
        w_balls += row.balls as f64 * w;
        w_wickets += row.wickets as f64 * w;
    }

    let mut eco_by_pitch = [None; 5];
    for pitch in PitchType::ALL {
        let (p_runs, p_balls): (u64, u64) = rows
            .iter()
            .filter(|r| r.pitch == pitch)
            .fold((0, 0), |acc, r| (acc.0 + r.runs, acc.1 + r.balls));
        if p_balls > 0 {
            eco_by_pitch[pitch.index()] = Some(economy(p_runs as f64, p_balls as f64));
        }
    }

    Some(BowlingProfile {
        player_id: player_id.to_string(),
        format,
        innings: rows.len(),
        career_wickets: wickets,
        career_avg: ratio(runs as f64, wickets as f64),
        career_economy: economy(runs as f64, balls as f64),
        career_strike_rate: ratio(balls as f64, wickets as f64),
        form_eco_short: economy(sum_runs(short) as f64, sum_balls(short) as f64),
        form_eco_long: economy(sum_runs(long) as f64, sum_balls(long) as f64),
        weighted_avg: ratio(w_runs, w_wickets),
        weighted_economy: economy(w_runs, w_balls),
        eco_by_pitch,
    })
}

fn venue_profiles(events: &[InningsEvent]) -> Vec<VenueProfile> {
    // Per-match aggregate batting runs at each venue, then mean across matches.
    let mut per_match: HashMap<(String, MatchFormat, String), u64> = HashMap::new();
    for ev in events {
        if ev.discipline != Discipline::Batting {
            continue;
        }
        *per_match
            .entry((ev.venue.clone(), ev.format, ev.match_id.clone()))
            .or_insert(0) += ev.runs as u64;
    }

    let mut by_venue: HashMap<(String, MatchFormat), (u64, usize)> = HashMap::new();
    for ((venue, format, _), runs) in per_match {
        let slot = by_venue.entry((venue, format)).or_insert((0, 0));
        slot.0 += runs;
        slot.1 += 1;
    }

    let mut out: Vec<VenueProfile> = by_venue
        .into_iter()
        .map(|((venue, format), (runs, matches))| VenueProfile {
            venue,
            format,
            matches,
            avg_innings_runs: runs as f64 / matches.max(1) as f64,
        })
        .collect();
    out.sort_by(|a, b| a.venue.cmp(&b.venue).then(a.format.label().cmp(b.format.label())));
    out
}

fn opponent_profiles(
    partitions: &HashMap<(String, MatchFormat, Discipline), Vec<&InningsEvent>>,
    keys: &mut Vec<(String, MatchFormat, Discipline)>,
) -> Vec<OpponentProfile> {
    let mut merged: HashMap<(String, MatchFormat, String), OpponentProfile> = HashMap::new();

    keys.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.label().cmp(b.1.label())).then(a.2.cmp(&b.2)));
    for key in keys.iter() {
        let rows = contest_rows(&partitions[key]);
        let mut by_opp: HashMap<String, Vec<&ContestRow>> = HashMap::new();
        for row in &rows {
            by_opp.entry(row.opponent.clone()).or_default().push(row);
        }
        for (opponent, opp_rows) in by_opp {
            if opp_rows.len() < MIN_OPPONENT_INNINGS {
                continue;
            }
            let runs: u64 = opp_rows.iter().map(|r| r.runs).sum();
            let balls: u64 = opp_rows.iter().map(|r| r.balls).sum();
            let wickets: u64 = opp_rows.iter().map(|r| r.wickets).sum();

            let entry = merged
                .entry((key.0.clone(), key.1, opponent.clone()))
                .or_insert_with(|| OpponentProfile {
                    player_id: key.0.clone(),
                    format: key.1,
                    opponent,
                    bat_innings: 0,
                    bat_avg: None,
                    bat_sr: None,
                    bowl_innings: 0,
                    bowl_economy: None,
                    bowl_avg: None,
                });
            match key.2 {
                Discipline::Batting => {
                    entry.bat_innings = opp_rows.len();
                    entry.bat_avg = Some(ratio(runs as f64, wickets as f64));
                    entry.bat_sr = Some(strike_rate(runs as f64, balls as f64));
                }
                Discipline::Bowling => {
                    entry.bowl_innings = opp_rows.len();
                    entry.bowl_economy = Some(economy(runs as f64, balls as f64));
                    entry.bowl_avg = Some(ratio(runs as f64, wickets as f64));
                }
            }
        }
    }

    let mut out: Vec<OpponentProfile> = merged.into_values().collect();
    out.sort_by(|a, b| {
        a.player_id
            .cmp(&b.player_id)
            .then(a.format.label().cmp(b.format.label()))
            .then(a.opponent.cmp(&b.opponent))
    });
    out
}

fn trailing(rows: &[ContestRow], window: usize) -> &[ContestRow] {
    let start = rows.len().saturating_sub(window);
    &rows[start..]
}

fn sum_runs(rows: &[ContestRow]) -> u64 {
    rows.iter().map(|r| r.runs).sum()
}

fn sum_balls(rows: &[ContestRow]) -> u64 {
    rows.iter().map(|r| r.balls).sum()
}

fn sum_wickets(rows: &[ContestRow]) -> u64 {
    rows.iter().map(|r| r.wickets).sum()
}

// Denominators are floored at 1 so a zero-dismissal or zero-ball sample never
// divides by zero.
fn ratio(numer: f64, denom: f64) -> f64 {
    numer / denom.max(1.0)
}

fn strike_rate(runs: f64, balls: f64) -> f64 {
    runs / balls.max(1.0) * 100.0
}

fn economy(runs: f64, balls: f64) -> f64 {
    runs * 6.0 / balls.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bat_event(player: &str, match_id: &str, d: &str, runs: u32, balls: u32) -> InningsEvent {
        InningsEvent {
            player_id: player.to_string(),
            discipline: Discipline::Batting,
            match_id: match_id.to_string(),
            seq: 0,
            date: date(d),
            format: MatchFormat::T20,
            venue: "Eden Gardens".to_string(),
            opponent: "Australia".to_string(),
            pitch: PitchType::Flat,
            runs,
            balls,
            wickets: 1,
        }
    }

    #[test]
    fn decay_weight_is_one_at_reference_and_half_at_half_life() {
        let r = date("2024-06-01");
        assert!((decay_weight(r, r, 180) - 1.0).abs() < 1e-12);
        let half = date("2023-12-04"); // 180 days earlier
        assert!((decay_weight(half, r, 180) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn future_events_clamp_to_weight_one() {
        let r = date("2024-06-01");
        assert!((decay_weight(date("2024-07-01"), r, 180) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn below_min_innings_is_absent_not_zero() {
        let events: Vec<InningsEvent> = (0..4)
            .map(|i| bat_event("thin", &format!("m{i}"), "2024-01-01", 20, 15))
            .collect();
        let out = aggregate(&events, date("2024-06-01"), &AggregateParams::default());
        assert!(out.batting.is_empty());
    }

    #[test]
    fn aggregate_is_idempotent() {
        let events: Vec<InningsEvent> = (0..8)
            .map(|i| bat_event("kohli", &format!("m{i}"), "2024-02-10", 35 + i, 22))
            .collect();
        let params = AggregateParams::default();
        let a = aggregate(&events, date("2024-06-01"), &params);
        let b = aggregate(&events, date("2024-06-01"), &params);
        assert_eq!(a.batting, b.batting);
        assert_eq!(a.venues, b.venues);
        assert_eq!(a.opponents, b.opponents);
    }

    #[test]
    fn decayed_average_tracks_simple_average_over_short_spans() {
        // Six weekly innings against a 180-day half-life: all weights near 1.
        let runs = [40u32, 55, 30, 60, 45, 50];
        let events: Vec<InningsEvent> = runs
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let d = date("2024-03-01") + chrono::Duration::days(7 * i as i64);
                let mut ev = bat_event("steady", &format!("m{i}"), "2024-03-01", *r, 30);
                ev.date = d;
                ev
            })
            .collect();
        let reference = events.last().unwrap().date;
        let out = aggregate(&events, reference, &AggregateParams::default());
        let profile = &out.batting[0];

        let simple = runs.iter().sum::<u32>() as f64 / runs.len() as f64;
        let rel = (profile.weighted_avg - simple).abs() / simple;
        assert!(rel < 0.03, "weighted {} vs simple {}", profile.weighted_avg, simple);
    }

    #[test]
    fn trailing_windows_use_most_recent_rows() {
        let mut events = Vec::new();
        for i in 0..20u32 {
            let d = date("2023-01-01") + chrono::Duration::days(i as i64 * 10);
            let runs = if i >= 15 { 100 } else { 10 };
            let mut ev = bat_event("surger", &format!("m{i:02}"), "2023-01-01", runs, 50);
            ev.date = d;
            events.push(ev);
        }
        let out = aggregate(&events, date("2024-01-01"), &AggregateParams::default());
        let p = &out.batting[0];
        // Last five innings all scored 100 off 50.
        assert!((p.form_sr_short - 200.0).abs() < 1e-9);
        assert!(p.form_sr_long < p.form_sr_short);
        assert!(p.career_sr < p.form_sr_long);
    }

    #[test]
    fn unobserved_pitch_segments_are_none() {
        let events: Vec<InningsEvent> = (0..6)
            .map(|i| bat_event("flat_only", &format!("m{i}"), "2024-01-01", 25, 20))
            .collect();
        let out = aggregate(&events, date("2024-06-01"), &AggregateParams::default());
        let p = &out.batting[0];
        assert!(p.sr_by_pitch[PitchType::Flat.index()].is_some());
        assert!(p.sr_by_pitch[PitchType::Spin.index()].is_none());
    }

    #[test]
    fn multi_innings_matches_collapse_to_one_contest_row() {
        let mut events = Vec::new();
        for seq in 0..2u32 {
            let mut ev = bat_event("opener", "m0", "2024-01-05", 30, 25);
            ev.seq = seq;
            events.push(ev);
        }
        for i in 1..6u32 {
            events.push(bat_event("opener", &format!("m{i}"), "2024-01-10", 30, 25));
        }
        let out = aggregate(&events, date("2024-06-01"), &AggregateParams::default());
        assert_eq!(out.batting[0].innings, 6);
        assert_eq!(out.batting[0].career_runs, 30 * 7);
    }
}
