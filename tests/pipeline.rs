use chrono::NaiveDate;

use xi_engine::aggregate::{AggregateParams, aggregate};
use xi_engine::ensemble::{Ensemble, UNCERTAINTY_PCT, fit_blend_weight};
use xi_engine::events::{Discipline, InningsEvent, MatchFormat, PitchType, Role};
use xi_engine::features::{
    MatchContext, MatchupTable, MedianTable, ProfileIndex, RoleOverrides, assemble, resolve_role,
};
use xi_engine::impact::impact_scores;
use xi_engine::model::{BaggedForest, BoostParams, FeatureRow, ForestParams, GradientBoost};
use xi_engine::optimizer::{Candidate, DEFAULT_SOLVE_TIMEOUT, SquadConstraints, select};
use xi_engine::persist::Store;
use xi_engine::report::squad_report;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Synthetic league: `strong` players score heavily and take wickets,
/// `weak` players do neither.
fn synthetic_events() -> Vec<InningsEvent> {
    let mut events = Vec::new();
    for m in 0..12u32 {
        let day = date("2024-01-05") + chrono::Duration::days(m as i64 * 10);
        for p in 0..14u32 {
            let strong = p < 7;
            let player_id = format!("{}{}", if strong { "strong" } else { "weak" }, p % 7);
            events.push(InningsEvent {
                player_id: player_id.clone(),
                discipline: Discipline::Batting,
                match_id: format!("m{m}"),
                seq: 0,
                date: day,
                format: MatchFormat::T20,
                venue: "Eden Gardens".to_string(),
                opponent: "Australia".to_string(),
                pitch: PitchType::Balanced,
                runs: if strong { 55 + (m + p) % 10 } else { 9 + p % 4 },
                balls: if strong { 35 } else { 14 },
                wickets: 0,
            });
            // Half of each tier also bowls.
            if p % 2 == 0 {
                events.push(InningsEvent {
                    player_id,
                    discipline: Discipline::Bowling,
                    match_id: format!("m{m}"),
                    seq: 1,
                    date: day,
                    format: MatchFormat::T20,
                    venue: "Eden Gardens".to_string(),
                    opponent: "Australia".to_string(),
                    pitch: PitchType::Balanced,
                    runs: if strong { 22 } else { 44 },
                    balls: 24,
                    wickets: if strong { 2 } else { 0 },
                });
            }
        }
    }
    events
}

#[test]
fn end_to_end_selection_prefers_strong_players() {
    let events = synthetic_events();

    // Store round trip, then profile aggregation.
    let mut store = Store::open_in_memory().unwrap();
    store.insert_events(&events).unwrap();
    let events = store.load_events().unwrap();

    let reference = date("2024-06-01");
    let agg = aggregate(&events, reference, &AggregateParams::default());
    let index = ProfileIndex::build(&agg);
    let matchups = MatchupTable::default();
    let mut overrides = RoleOverrides::default();
    overrides
        .by_player
        .insert("strong1".to_string(), Role::Keeper);
    overrides
        .by_player
        .insert("weak1".to_string(), Role::Keeper);

    // Training labels and features from the same history.
    let labels = impact_scores(&events);
    let ctx = MatchContext {
        format: MatchFormat::T20,
        venue: "Eden Gardens".to_string(),
        opponent: "Australia".to_string(),
        pitch: PitchType::Balanced,
    };
    let mut train_vectors: Vec<_> = labels
        .iter()
        .map(|row| {
            let role = resolve_role(&row.player_id, row.format, &index, &overrides);
            assemble(&row.player_id, role, &ctx, &index, &matchups)
        })
        .collect();
    let targets: Vec<f64> = labels.iter().map(|row| row.impact).collect();
    let medians = MedianTable::fit(&train_vectors);
    for fv in &mut train_vectors {
        medians.impute(fv);
    }
    let rows: Vec<FeatureRow> = train_vectors.iter().map(|fv| fv.values).collect();

    let boost = GradientBoost::fit(
        &rows,
        &targets,
        BoostParams {
            n_trees: 40,
            ..Default::default()
        },
    );
    let forest = BaggedForest::fit(
        &rows,
        &targets,
        ForestParams {
            n_trees: 30,
            ..Default::default()
        },
    );
    let bp: Vec<f64> = rows.iter().map(|r| boost.predict(r)).collect();
    let fp: Vec<f64> = rows.iter().map(|r| forest.predict(r)).collect();
    let blend_weight = fit_blend_weight(&bp, &fp, &targets);

    let ensemble = Ensemble {
        boost,
        forest,
        blend_weight,
        uncertainty_pct: UNCERTAINTY_PCT,
    };

    // Score the full pool for the upcoming match.
    let mut pool: Vec<String> = (0..14)
        .map(|p| format!("{}{}", if p < 7 { "strong" } else { "weak" }, p % 7))
        .collect();
    pool.sort();
    pool.dedup();
    let mut vectors: Vec<_> = pool
        .iter()
        .map(|id| {
            let role = resolve_role(id, MatchFormat::T20, &index, &overrides);
            assemble(id, role, &ctx, &index, &matchups)
        })
        .collect();
    for fv in &mut vectors {
        medians.impute(fv);
    }
    let predictions = ensemble.predict(&vectors);

    for pred in &predictions {
        assert!((0.0..=100.0).contains(&pred.score));
        assert!(pred.lo <= pred.score && pred.score <= pred.hi);
        assert!((pred.hi - pred.score) <= pred.score * UNCERTAINTY_PCT + 1e-9);
    }

    let candidates: Vec<Candidate> = vectors
        .iter()
        .zip(&predictions)
        .map(|(fv, pred)| Candidate {
            player_id: fv.player_id.clone(),
            role: fv.role,
            score: pred.score,
            lo: pred.lo,
            hi: pred.hi,
            overseas: false,
        })
        .collect();

    let constraints = SquadConstraints {
        squad_size: 8,
        min_batting_options: 3,
        min_bowling_options: 3,
        min_allrounders: 2,
        min_keepers: 1,
        max_keepers: 2,
        max_overseas: 4,
    };
    let selection = select(&candidates, &constraints, DEFAULT_SOLVE_TIMEOUT).unwrap();
    assert!(selection.status.quota_compliant());
    assert_eq!(selection.chosen().count(), 8);

    let strong_chosen = selection
        .chosen()
        .filter(|r| r.player_id.starts_with("strong"))
        .count();
    assert!(
        strong_chosen >= 6,
        "expected the squad to be dominated by strong players, got {strong_chosen}"
    );

    let report = squad_report(&selection, &vectors, &predictions);
    assert!(report.contains("Squad selection [Optimal]"));
    assert!(report.contains("Full pool ranking:"));
    for row in selection.chosen() {
        assert!(report.contains(row.player_id.as_str()));
    }
}
