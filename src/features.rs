use std::collections::HashMap;

use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateOutput, BattingProfile, BowlingProfile, OpponentProfile, VenueProfile};
use crate::events::{MatchFormat, PitchType, Role};

/// Single versioned feature contract shared between training and inference.
/// Order is load-bearing; the model artifact stores a copy and any mismatch
/// at load time is a hard error.
pub const FEATURE_NAMES: [&str; 26] = [
    "career_avg_bat",
    "career_sr_bat",
    "form_avg_short",
    "form_sr_short",
    "form_avg_long",
    "form_sr_long",
    "weighted_avg_bat",
    "weighted_sr_bat",
    "bat_sr_this_pitch",
    "career_wickets",
    "career_avg_bowl",
    "career_economy",
    "form_eco_short",
    "form_eco_long",
    "weighted_avg_bowl",
    "weighted_economy",
    "bowl_eco_this_pitch",
    "venue_avg_innings_runs",
    "matchup_sr",
    "matchup_dismissal_rate",
    "vs_opp_bat_avg",
    "vs_opp_bat_sr",
    "vs_opp_bowl_economy",
    "format_enc",
    "pitch_enc",
    "role_enc",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Code emitted for a categorical value absent from the fixed encode maps.
pub const UNKNOWN_CODE: i64 = -1;

pub const MIN_MATCHUP_BALLS: u32 = 10;

static FORMAT_ENC: Lazy<HashMap<&'static str, i64>> =
    Lazy::new(|| HashMap::from([("test", 0), ("odi", 1), ("t20", 2)]));
static PITCH_ENC: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([("balanced", 0), ("flat", 1), ("pace", 2), ("seam", 3), ("spin", 4)])
});
static ROLE_ENC: Lazy<HashMap<&'static str, i64>> =
    Lazy::new(|| HashMap::from([("BAT", 0), ("BOWL", 1), ("ALL", 2), ("WK", 3)]));

pub fn encode_format(label: &str) -> i64 {
    *FORMAT_ENC.get(label).unwrap_or(&UNKNOWN_CODE)
}

pub fn encode_pitch(label: &str) -> i64 {
    *PITCH_ENC.get(label).unwrap_or(&UNKNOWN_CODE)
}

pub fn encode_role(label: &str) -> i64 {
    *ROLE_ENC.get(label).unwrap_or(&UNKNOWN_CODE)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub player_id: String,
    pub role: Role,
    pub format: MatchFormat,
    pub values: [f64; FEATURE_COUNT],
    /// True where the value came from a lookup; false where it was (or will
    /// be) imputed.
    pub observed: [bool; FEATURE_COUNT],
}

impl FeatureVector {
    fn blank(player_id: &str, role: Role, format: MatchFormat) -> Self {
        Self {
            player_id: player_id.to_string(),
            role,
            format,
            values: [0.0; FEATURE_COUNT],
            observed: [false; FEATURE_COUNT],
        }
    }

    fn set(&mut self, idx: usize, value: f64) {
        self.values[idx] = value;
        self.observed[idx] = true;
    }

    fn set_opt(&mut self, idx: usize, value: Option<f64>) {
        if let Some(v) = value {
            self.set(idx, v);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        let idx = feature_index(name)?;
        self.observed[idx].then_some(self.values[idx])
    }
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// Head-to-head batter vs bowler records, pre-filtered to a minimum ball
/// count so tiny samples never reach the feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchupRecord {
    pub batter_id: String,
    pub bowler_id: String,
    pub format: MatchFormat,
    pub balls: u32,
    pub runs: u32,
    pub dismissals: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MatchupTable {
    by_batter: HashMap<(String, MatchFormat), Vec<MatchupRecord>>,
}

impl MatchupTable {
    pub fn new(records: Vec<MatchupRecord>) -> Self {
        let mut by_batter: HashMap<(String, MatchFormat), Vec<MatchupRecord>> = HashMap::new();
        for rec in records {
            if rec.balls < MIN_MATCHUP_BALLS {
                continue;
            }
            by_batter
                .entry((rec.batter_id.clone(), rec.format))
                .or_default()
                .push(rec);
        }
        Self { by_batter }
    }

    /// Mean strike rate and dismissal rate over the batter's qualifying
    /// matchups in a format.
    pub fn batter_summary(&self, batter_id: &str, format: MatchFormat) -> Option<(f64, f64)> {
        let recs = self.by_batter.get(&(batter_id.to_string(), format))?;
        if recs.is_empty() {
            return None;
        }
        let mut sr_sum = 0.0;
        let mut dr_sum = 0.0;
        for rec in recs {
            let balls = rec.balls.max(1) as f64;
            sr_sum += rec.runs as f64 / balls * 100.0;
            dr_sum += rec.dismissals as f64 / balls;
        }
        let n = recs.len() as f64;
        Some((sr_sum / n, dr_sum / n))
    }
}

/// Versioned player -> role override table, consulted before the data-driven
/// heuristic. Keeper assignments come only from here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleOverrides {
    pub version: u32,
    pub by_player: HashMap<String, Role>,
}

/// Lookup index built once per pipeline run and passed by parameter, so
/// repeated or parallel runs never share mutable state.
#[derive(Debug, Default)]
pub struct ProfileIndex {
    batting: HashMap<(String, MatchFormat), BattingProfile>,
    bowling: HashMap<(String, MatchFormat), BowlingProfile>,
    venues: HashMap<(String, MatchFormat), VenueProfile>,
    opponents: HashMap<(String, MatchFormat, String), OpponentProfile>,
}

impl ProfileIndex {
    pub fn build(agg: &AggregateOutput) -> Self {
        let mut index = Self::default();
        for p in &agg.batting {
            index
                .batting
                .insert((p.player_id.clone(), p.format), p.clone());
        }
        for p in &agg.bowling {
            index
                .bowling
                .insert((p.player_id.clone(), p.format), p.clone());
        }
        for v in &agg.venues {
            index.venues.insert((v.venue.clone(), v.format), v.clone());
        }
        for o in &agg.opponents {
            index.opponents.insert(
                (o.player_id.clone(), o.format, o.opponent.clone()),
                o.clone(),
            );
        }
        index
    }

    pub fn batting(&self, player_id: &str, format: MatchFormat) -> Option<&BattingProfile> {
        self.batting.get(&(player_id.to_string(), format))
    }

    pub fn bowling(&self, player_id: &str, format: MatchFormat) -> Option<&BowlingProfile> {
        self.bowling.get(&(player_id.to_string(), format))
    }

    pub fn venue(&self, venue: &str, format: MatchFormat) -> Option<&VenueProfile> {
        self.venues.get(&(venue.to_string(), format))
    }

    pub fn opponent(
        &self,
        player_id: &str,
        format: MatchFormat,
        opponent: &str,
    ) -> Option<&OpponentProfile> {
        self.opponents
            .get(&(player_id.to_string(), format, opponent.to_string()))
    }
}

/// Resolve a player's role: override table first, then has-batted/has-bowled.
/// The heuristic never yields Keeper; that requires an override entry.
pub fn resolve_role(
    player_id: &str,
    format: MatchFormat,
    index: &ProfileIndex,
    overrides: &RoleOverrides,
) -> Role {
    if let Some(role) = overrides.by_player.get(player_id) {
        return *role;
    }
    let has_bat = index.batting(player_id, format).is_some();
    let has_bowl = index.bowling(player_id, format).is_some();
    match (has_bat, has_bowl) {
        (true, true) => Role::AllRounder,
        (false, true) => Role::Bowler,
        _ => Role::Batter,
    }
}

#[derive(Debug, Clone)]
pub struct MatchContext {
    pub format: MatchFormat,
    pub venue: String,
    pub opponent: String,
    pub pitch: PitchType,
}

/// Pure lookup-and-join: every declared feature is attempted against the
/// aggregator output and reference tables; misses stay unobserved until
/// `MedianTable::impute` runs.
pub fn assemble(
    player_id: &str,
    role: Role,
    ctx: &MatchContext,
    index: &ProfileIndex,
    matchups: &MatchupTable,
) -> FeatureVector {
    let mut fv = FeatureVector::blank(player_id, role, ctx.format);

    if let Some(bat) = index.batting(player_id, ctx.format) {
        fv.set(0, bat.career_avg);
        fv.set(1, bat.career_sr);
        fv.set(2, bat.form_avg_short);
        fv.set(3, bat.form_sr_short);
        fv.set(4, bat.form_avg_long);
        fv.set(5, bat.form_sr_long);
        fv.set(6, bat.weighted_avg);
        fv.set(7, bat.weighted_sr);
        fv.set_opt(8, bat.sr_by_pitch[ctx.pitch.index()]);
    }

    if let Some(bowl) = index.bowling(player_id, ctx.format) {
        fv.set(9, bowl.career_wickets as f64);
        fv.set(10, bowl.career_avg);
        fv.set(11, bowl.career_economy);
        fv.set(12, bowl.form_eco_short);
        fv.set(13, bowl.form_eco_long);
        fv.set(14, bowl.weighted_avg);
        fv.set(15, bowl.weighted_economy);
        fv.set_opt(16, bowl.eco_by_pitch[ctx.pitch.index()]);
    }

    if let Some(venue) = index.venue(&ctx.venue, ctx.format) {
        fv.set(17, venue.avg_innings_runs);
    }

    if let Some((sr, dr)) = matchups.batter_summary(player_id, ctx.format) {
        fv.set(18, sr);
        fv.set(19, dr);
    }

    if let Some(opp) = index.opponent(player_id, ctx.format, &ctx.opponent) {
        fv.set_opt(20, opp.bat_avg);
        fv.set_opt(21, opp.bat_sr);
        fv.set_opt(22, opp.bowl_economy);
    }

    fv.set(23, encode_format(ctx.format.label()) as f64);
    fv.set(24, encode_pitch(ctx.pitch.label()) as f64);
    fv.set(25, encode_role(role.label()) as f64);

    fv
}

/// Per-segment (format) medians fitted on the training population and used
/// to fill unobserved numeric features. Never a global median while the
/// segment has signal, never a zero fill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedianTable {
    segment: HashMap<String, [Option<f64>; FEATURE_COUNT]>,
    pooled: [Option<f64>; FEATURE_COUNT],
}

impl MedianTable {
    pub fn fit(population: &[FeatureVector]) -> Self {
        let mut per_segment: HashMap<String, Vec<Vec<f64>>> = HashMap::new();
        let mut pooled_vals: Vec<Vec<f64>> = vec![Vec::new(); FEATURE_COUNT];

        for fv in population {
            let bucket = per_segment
                .entry(fv.format.label().to_string())
                .or_insert_with(|| vec![Vec::new(); FEATURE_COUNT]);
            for idx in 0..FEATURE_COUNT {
                if fv.observed[idx] {
                    bucket[idx].push(fv.values[idx]);
                    pooled_vals[idx].push(fv.values[idx]);
                }
            }
        }

        let segment = per_segment
            .into_iter()
            .map(|(key, cols)| (key, medians_of(cols)))
            .collect();
        Self {
            segment,
            pooled: medians_of(pooled_vals),
        }
    }

    /// Fill every unobserved feature. The observed mask is left untouched so
    /// downstream consumers can still tell imputed from observed.
    pub fn impute(&self, fv: &mut FeatureVector) {
        let seg = self.segment.get(fv.format.label());
        for idx in 0..FEATURE_COUNT {
            if fv.observed[idx] {
                continue;
            }
            match seg.and_then(|m| m[idx]).or(self.pooled[idx]) {
                Some(filled) => fv.values[idx] = filled,
                None => {
                    // Nothing observed for this feature anywhere in the
                    // fitted population; the zero fill must be visible.
                    tracing::warn!(
                        player = %fv.player_id,
                        feature = FEATURE_NAMES[idx],
                        "no median available in any segment; zero-filling"
                    );
                    fv.values[idx] = 0.0;
                }
            }
        }
    }
}

fn medians_of(mut cols: Vec<Vec<f64>>) -> [Option<f64>; FEATURE_COUNT] {
    let mut out = [None; FEATURE_COUNT];
    for (idx, col) in cols.iter_mut().enumerate() {
        if col.is_empty() {
            continue;
        }
        col.sort_by(|a, b| a.total_cmp(b));
        let mid = col.len() / 2;
        out[idx] = Some(if col.len() % 2 == 1 {
            col[mid]
        } else {
            (col[mid - 1] + col[mid]) / 2.0
        });
    }
    out
}

/// Input-shape guard: a caller-supplied feature-name list must match the
/// compiled contract exactly. Surfaces the first disagreeing entry.
pub fn check_feature_contract(names: &[String]) -> Result<()> {
    if names.len() != FEATURE_COUNT {
        bail!(
            "feature contract mismatch: expected {} features, artifact lists {}",
            FEATURE_COUNT,
            names.len()
        );
    }
    for (idx, name) in names.iter().enumerate() {
        if name != FEATURE_NAMES[idx] {
            bail!(
                "feature contract mismatch at position {}: expected '{}', artifact lists '{}'",
                idx,
                FEATURE_NAMES[idx],
                name
            );
        }
    }
    Ok(())
}
