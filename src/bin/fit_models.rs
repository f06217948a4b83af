use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;

use xi_engine::aggregate::{AggregateParams, aggregate};
use xi_engine::ensemble::{ModelArtifact, fit_blend_weight, forward_chain_folds, rmse};
use xi_engine::events::InningsEvent;
use xi_engine::features::{
    FeatureVector, MatchContext, MatchupTable, MedianTable, ProfileIndex, assemble, resolve_role,
};
use xi_engine::impact::impact_scores;
use xi_engine::model::{BaggedForest, BoostParams, FeatureRow, ForestParams, GradientBoost};
use xi_engine::persist::Store;

const DEFAULT_FOLDS: usize = 5;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_path = parse_path_arg("--db")
        .or_else(|| std::env::var("XI_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data/xi_engine.db"));
    let out_path =
        parse_path_arg("--out").unwrap_or_else(|| PathBuf::from("assets/xi_model_v1.json"));
    let n_folds = parse_usize_arg("--folds").unwrap_or(DEFAULT_FOLDS).max(2);
    let seed = parse_usize_arg("--seed").map(|s| s as u64).unwrap_or(42);

    let store = Store::open(&db_path)?;
    let mut events = store.load_events()?;
    if events.is_empty() {
        return Err(anyhow!("event log at {} is empty", db_path.display()));
    }
    events.sort_by(InningsEvent::chronological);
    let matchups = MatchupTable::new(store.load_matchups()?);
    let overrides = store.load_role_overrides()?;

    tracing::info!(events = events.len(), "building training labels");
    let labels = impact_scores(&events);

    // Point-in-time features: for each distinct match date, profiles are
    // rebuilt from strictly earlier events, so a label never sees its own
    // match. Rows whose date has no history yet are dropped.
    let params = AggregateParams::default();
    let mut vectors: Vec<FeatureVector> = Vec::new();
    let mut targets: Vec<f64> = Vec::new();
    let mut dates: Vec<NaiveDate> = Vec::new();

    let mut cursor = 0usize;
    let mut label_at = 0usize;
    while label_at < labels.len() {
        let day = labels[label_at].date;
        while cursor < events.len() && events[cursor].date < day {
            cursor += 1;
        }
        if cursor == 0 {
            while label_at < labels.len() && labels[label_at].date == day {
                label_at += 1;
            }
            continue;
        }

        let agg = aggregate(&events[..cursor], day, &params);
        let index = ProfileIndex::build(&agg);
        while label_at < labels.len() && labels[label_at].date == day {
            let row = &labels[label_at];
            let role = resolve_role(&row.player_id, row.format, &index, &overrides);
            let ctx = MatchContext {
                format: row.format,
                venue: row.venue.clone(),
                opponent: row.opponent.clone(),
                pitch: row.pitch,
            };
            vectors.push(assemble(&row.player_id, role, &ctx, &index, &matchups));
            targets.push(row.impact);
            dates.push(row.date);
            label_at += 1;
        }
    }
    if vectors.len() < 50 {
        return Err(anyhow!(
            "only {} usable training rows; need at least 50",
            vectors.len()
        ));
    }
    tracing::info!(rows = vectors.len(), "assembled point-in-time features");

    let medians = MedianTable::fit(&vectors);
    for fv in &mut vectors {
        medians.impute(fv);
    }
    let rows: Vec<FeatureRow> = vectors.iter().map(|fv| fv.values).collect();

    // Forward-chaining CV: collect out-of-fold predictions from both models,
    // then fit the blend weight on the pooled validation slices.
    let boost_params = BoostParams::default();
    let forest_params = ForestParams {
        seed,
        ..Default::default()
    };
    let mut oof_boost: Vec<f64> = Vec::new();
    let mut oof_forest: Vec<f64> = Vec::new();
    let mut oof_truth: Vec<f64> = Vec::new();

    for (fold, (train, val)) in forward_chain_folds(rows.len(), n_folds).into_iter().enumerate() {
        let boost = GradientBoost::fit(&rows[train.clone()], &targets[train.clone()], boost_params);
        let forest = BaggedForest::fit(&rows[train.clone()], &targets[train], forest_params);

        let bp: Vec<f64> = rows[val.clone()].iter().map(|r| boost.predict(r)).collect();
        let fp: Vec<f64> = rows[val.clone()].iter().map(|r| forest.predict(r)).collect();
        let truth = &targets[val.clone()];
        tracing::info!(
            fold,
            val_rows = truth.len(),
            boost_rmse = rmse(&bp, truth),
            forest_rmse = rmse(&fp, truth),
            "fold complete"
        );
        oof_boost.extend(bp);
        oof_forest.extend(fp);
        oof_truth.extend_from_slice(truth);
    }
    if oof_truth.is_empty() {
        return Err(anyhow!("dataset too small to build validation folds"));
    }

    let blend_weight = fit_blend_weight(&oof_boost, &oof_forest, &oof_truth);
    let blended: Vec<f64> = oof_boost
        .iter()
        .zip(&oof_forest)
        .map(|(a, b)| blend_weight * a + (1.0 - blend_weight) * b)
        .collect();
    tracing::info!(
        blend_weight,
        boost_rmse = rmse(&oof_boost, &oof_truth),
        forest_rmse = rmse(&oof_forest, &oof_truth),
        blend_rmse = rmse(&blended, &oof_truth),
        "validation summary"
    );

    // Final models on the full history.
    let boost = GradientBoost::fit(&rows, &targets, boost_params);
    let forest = BaggedForest::fit(&rows, &targets, forest_params);

    let start = dates.first().map(|d| d.to_string()).unwrap_or_default();
    let end = dates.last().map(|d| d.to_string()).unwrap_or_default();
    let artifact = ModelArtifact::new(boost, forest, blend_weight, start, end);
    artifact.save(&out_path)?;

    println!(
        "model artifact written: {} (rows={} blend_weight={:.2} validation_rmse={:.2})",
        out_path.display(),
        rows.len(),
        blend_weight,
        rmse(&blended, &oof_truth)
    );
    Ok(())
}

fn parse_str_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{name}="))
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_str_arg(name).map(PathBuf::from)
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_str_arg(name).and_then(|raw| raw.parse::<usize>().ok())
}
