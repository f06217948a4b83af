use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

use xi_engine::aggregate::{AggregateParams, aggregate};
use xi_engine::ensemble::ModelArtifact;
use xi_engine::events::{MatchFormat, PitchType};
use xi_engine::features::{
    MatchContext, MatchupTable, MedianTable, ProfileIndex, assemble, resolve_role,
};
use xi_engine::optimizer::{Candidate, DEFAULT_SOLVE_TIMEOUT, SquadConstraints, select};
use xi_engine::persist::Store;
use xi_engine::report::squad_report;

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
    let model_path = parse_path_arg("--model")
        .unwrap_or_else(|| PathBuf::from("assets/xi_model_v1.json"));

    let format = parse_str_arg("--format")
        .as_deref()
        .and_then(MatchFormat::parse)
        .ok_or_else(|| anyhow!("--format is required (t20, odi or test)"))?;
    let venue = parse_str_arg("--venue").ok_or_else(|| anyhow!("--venue is required"))?;
    let opponent =
        parse_str_arg("--opponent").ok_or_else(|| anyhow!("--opponent is required"))?;
    let pitch = parse_str_arg("--pitch")
        .as_deref()
        .and_then(PitchType::parse)
        .unwrap_or(PitchType::Balanced);
    let reference_date = match parse_str_arg("--date") {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("bad --date '{raw}', expected YYYY-MM-DD"))?,
        None => chrono::Utc::now().date_naive(),
    };
    let overseas: HashSet<String> = parse_str_arg("--overseas")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut constraints = SquadConstraints::default();
    if let Some(v) = parse_usize_arg("--squad-size") {
        constraints.squad_size = v;
    }
    if let Some(v) = parse_usize_arg("--max-overseas") {
        constraints.max_overseas = v;
    }
    let timeout = parse_usize_arg("--timeout-secs")
        .map(|secs| Duration::from_secs(secs as u64))
        .unwrap_or(DEFAULT_SOLVE_TIMEOUT);

    let mut store = Store::open(&db_path)?;
    let events = store.load_events()?;
    if events.is_empty() {
        return Err(anyhow!("event log at {} is empty", db_path.display()));
    }
    tracing::info!(events = events.len(), date = %reference_date, "aggregating profiles");

    let agg = aggregate(&events, reference_date, &AggregateParams::default());
    store.save_profiles(&agg)?;
    let index = ProfileIndex::build(&agg);
    let matchups = MatchupTable::new(store.load_matchups()?);
    let overrides = store.load_role_overrides()?;

    // Pool: every player holding at least one profile in the target format.
    let mut pool: Vec<String> = agg
        .batting
        .iter()
        .filter(|p| p.format == format)
        .map(|p| p.player_id.clone())
        .chain(
            agg.bowling
                .iter()
                .filter(|p| p.format == format)
                .map(|p| p.player_id.clone()),
        )
        .collect();
    pool.sort();
    pool.dedup();
    if pool.is_empty() {
        return Err(anyhow!("no players with {} profiles in the log", format.label()));
    }

    let ctx = MatchContext {
        format,
        venue,
        opponent,
        pitch,
    };
    let mut vectors: Vec<_> = pool
        .iter()
        .map(|player_id| {
            let role = resolve_role(player_id, format, &index, &overrides);
            assemble(player_id, role, &ctx, &index, &matchups)
        })
        .collect();
    let medians = MedianTable::fit(&vectors);
    for fv in &mut vectors {
        medians.impute(fv);
    }

    let ensemble = ModelArtifact::load(&model_path)?;
    let predictions = ensemble.predict(&vectors);

    let candidates: Vec<Candidate> = vectors
        .iter()
        .zip(&predictions)
        .map(|(fv, pred)| Candidate {
            player_id: fv.player_id.clone(),
            role: fv.role,
            score: pred.score,
            lo: pred.lo,
            hi: pred.hi,
            overseas: overseas.contains(&fv.player_id),
        })
        .collect();

    tracing::info!(pool = candidates.len(), "solving squad selection");
    let selection = select(&candidates, &constraints, timeout)?;
    tracing::info!(status = selection.status.label(), total = selection.total_score, "solved");

    print!("{}", squad_report(&selection, &vectors, &predictions));
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
