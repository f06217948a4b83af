use crate::ensemble::Prediction;
use crate::events::{MatchFormat, Role};
use crate::features::FeatureVector;
use crate::optimizer::{Selection, SolveStatus};

/// Recent form must beat career output by this ratio before the form
/// sentence wins the justification slot.
const FORM_OVER_CAREER_RATIO: f64 = 1.1;

/// Pitch-suited strike rate threshold relative to overall career rate.
const PITCH_EDGE_RATIO: f64 = 1.05;

/// At most this many reason clauses per player; lower-priority signals are
/// dropped once the cap is reached.
const MAX_REASONS: usize = 3;

/// One human-readable sentence explaining why a player was picked. Built
/// only from features that were actually observed; imputed values never
/// produce a claim about the player.
pub fn justify(fv: &FeatureVector, pred: &Prediction) -> String {
    let mut reasons: Vec<String> = Vec::new();

    if let (Some(form), Some(career)) = (fv.get("form_avg_short"), fv.get("career_avg_bat"))
        && career > 0.0
        && form > career * FORM_OVER_CAREER_RATIO
    {
        reasons.push(format!(
            "in strong recent form, averaging {form:.1} over the last few innings against a career {career:.1}"
        ));
    }

    if let (Some(pitch_sr), Some(career_sr)) =
        (fv.get("bat_sr_this_pitch"), fv.get("career_sr_bat"))
        && career_sr > 0.0
        && pitch_sr > career_sr * PITCH_EDGE_RATIO
    {
        reasons.push(format!(
            "strikes at {pitch_sr:.0} on this pitch type, above the career rate of {career_sr:.0}"
        ));
    }

    match fv.role {
        Role::Bowler | Role::AllRounder => {
            if let Some(wkts) = fv.get("career_wickets")
                && wkts >= 50.0
            {
                let eco = fv.get("career_economy");
                reasons.push(match eco {
                    Some(e) => format!(
                        "a proven wicket-taker with {wkts:.0} career wickets at an economy of {e:.2}"
                    ),
                    None => format!("a proven wicket-taker with {wkts:.0} career wickets"),
                });
            }
        }
        Role::Keeper => {
            reasons.push("provides the wicket-keeping cover the squad requires".to_string());
        }
        Role::Batter => {}
    }

    if let Some(opp_avg) = fv.get("vs_opp_bat_avg")
        && fv
            .get("career_avg_bat")
            .is_some_and(|career| career > 0.0 && opp_avg > career)
    {
        reasons.push(format!(
            "a strong record against this opponent, averaging {opp_avg:.1}"
        ));
    }

    if let Some(venue_runs) = fv.get("venue_avg_innings_runs")
        && venue_runs >= high_scoring_venue_floor(fv.format)
        && matches!(fv.role, Role::Batter | Role::Keeper)
    {
        reasons.push(format!(
            "suited to a high-scoring venue ({venue_runs:.0} average innings runs)"
        ));
    }

    reasons.truncate(MAX_REASONS);

    let lead = match reasons.len() {
        0 => "selected on overall projected output".to_string(),
        1 => reasons.remove(0),
        _ => {
            let last = reasons.pop().unwrap_or_default();
            format!("{}, and {}", reasons.join(", "), last)
        }
    };

    format!(
        "{} ({}): projected {:.1} points [{:.1}-{:.1}]; {}.",
        fv.player_id,
        fv.role.label(),
        pred.score,
        pred.lo,
        pred.hi,
        lead
    )
}

/// An innings total that reads as high-scoring differs by format; the T20
/// figure must not mark every longer-format venue as a run feast.
fn high_scoring_venue_floor(format: MatchFormat) -> f64 {
    match format {
        MatchFormat::T20 => 170.0,
        MatchFormat::Odi => 300.0,
        MatchFormat::Test => 380.0,
    }
}

/// Plain-text squad report: the chosen squad in role order with one
/// justification line each, then the full ranked pool.
pub fn squad_report(
    selection: &Selection,
    vectors: &[FeatureVector],
    predictions: &[Prediction],
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Squad selection [{}]  total projected score {:.1}\n",
        selection.status.label(),
        selection.total_score
    ));
    if selection.status == SolveStatus::SuboptimalFallback {
        out.push_str("note: role quotas were not satisfiable; squad is top-score greedy\n");
    }
    out.push('\n');

    for row in selection.chosen() {
        let line = vectors
            .iter()
            .position(|fv| fv.player_id == row.player_id)
            .map(|idx| justify(&vectors[idx], &predictions[idx]))
            .unwrap_or_else(|| {
                format!(
                    "{} ({}): projected {:.1} points [{:.1}-{:.1}].",
                    row.player_id,
                    row.role.label(),
                    row.score,
                    row.lo,
                    row.hi
                )
            });
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str("\nFull pool ranking:\n");
    let mut ranked: Vec<_> = selection.rows.iter().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    for (rank, row) in ranked.iter().enumerate() {
        out.push_str(&format!(
            "  {:>2}. {:<24} {:<4} {:6.1} [{:.1}-{:.1}]{}\n",
            rank + 1,
            row.player_id,
            row.role.label(),
            row.score,
            row.lo,
            row.hi,
            if row.chosen { "  *" } else { "" }
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MatchFormat;
    use crate::features::{FEATURE_COUNT, feature_index};

    fn vector(player: &str, role: Role) -> FeatureVector {
        FeatureVector {
            player_id: player.to_string(),
            role,
            format: MatchFormat::T20,
            values: [0.0; FEATURE_COUNT],
            observed: [false; FEATURE_COUNT],
        }
    }

    fn set(fv: &mut FeatureVector, name: &str, value: f64) {
        let idx = feature_index(name).unwrap();
        fv.values[idx] = value;
        fv.observed[idx] = true;
    }

    fn pred(score: f64) -> Prediction {
        Prediction {
            score,
            lo: score * 0.85,
            hi: score * 1.15,
        }
    }

    #[test]
    fn form_surge_outranks_generic_fallback() {
        let mut fv = vector("kohli", Role::Batter);
        set(&mut fv, "career_avg_bat", 40.0);
        set(&mut fv, "form_avg_short", 55.0);
        let line = justify(&fv, &pred(72.0));
        assert!(line.contains("strong recent form"));
        assert!(line.contains("55.0"));
        assert!(!line.contains("overall projected output"));
    }

    #[test]
    fn form_within_threshold_does_not_claim_form() {
        let mut fv = vector("kohli", Role::Batter);
        set(&mut fv, "career_avg_bat", 40.0);
        set(&mut fv, "form_avg_short", 42.0);
        let line = justify(&fv, &pred(60.0));
        assert!(!line.contains("strong recent form"));
        assert!(line.contains("overall projected output"));
    }

    #[test]
    fn imputed_values_never_generate_claims() {
        let mut fv = vector("ghost", Role::Batter);
        // Values present but masked unobserved, as after imputation.
        let idx = feature_index("form_avg_short").unwrap();
        fv.values[idx] = 90.0;
        let career = feature_index("career_avg_bat").unwrap();
        fv.values[career] = 10.0;
        let line = justify(&fv, &pred(50.0));
        assert!(line.contains("overall projected output"));
    }

    #[test]
    fn keeper_line_mentions_cover() {
        let fv = vector("pant", Role::Keeper);
        let line = justify(&fv, &pred(64.0));
        assert!(line.contains("wicket-keeping cover"));
    }

    #[test]
    fn justification_keeps_at_most_three_signals() {
        // Form, pitch, wickets and opponent all fire; the lowest-priority
        // opponent clause must be dropped.
        let mut fv = vector("stokes", Role::AllRounder);
        set(&mut fv, "career_avg_bat", 40.0);
        set(&mut fv, "form_avg_short", 55.0);
        set(&mut fv, "career_sr_bat", 120.0);
        set(&mut fv, "bat_sr_this_pitch", 150.0);
        set(&mut fv, "career_wickets", 120.0);
        set(&mut fv, "career_economy", 7.1);
        set(&mut fv, "vs_opp_bat_avg", 58.0);
        let line = justify(&fv, &pred(75.0));
        assert!(line.contains("strong recent form"));
        assert!(line.contains("on this pitch type"));
        assert!(line.contains("wicket-taker"));
        assert!(!line.contains("against this opponent"));
    }

    #[test]
    fn venue_threshold_tracks_the_format() {
        let mut t20 = vector("buttler", Role::Batter);
        set(&mut t20, "venue_avg_innings_runs", 185.0);
        assert!(justify(&t20, &pred(60.0)).contains("high-scoring venue"));

        let mut odi = vector("buttler", Role::Batter);
        odi.format = MatchFormat::Odi;
        set(&mut odi, "venue_avg_innings_runs", 185.0);
        assert!(!justify(&odi, &pred(60.0)).contains("high-scoring venue"));
    }

    #[test]
    fn bowler_with_wickets_gets_wicket_taker_line() {
        let mut fv = vector("bumrah", Role::Bowler);
        set(&mut fv, "career_wickets", 180.0);
        set(&mut fv, "career_economy", 6.55);
        let line = justify(&fv, &pred(70.0));
        assert!(line.contains("180 career wickets"));
        assert!(line.contains("6.55"));
    }
}
