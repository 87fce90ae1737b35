use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use teamstrength::collectors::{SourceHandle, Sources, standard_collectors};
use teamstrength::config::Config;
use teamstrength::model::CompetitionKind;
use teamstrength::odds::OddsEngine;
use teamstrength::orchestrator::{Orchestrator, RefreshScope};
use teamstrength::params::Parameter;
use teamstrength::providers::HttpApiProvider;
use teamstrength::query::Queries;
use teamstrength::store::Store;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(std::env::var("APP_LOG").unwrap_or_else(|_| "info".to_string()))
        }))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };

    let config = Config::from_env()?;
    let store = Store::open(&db_path(&args))?;

    match command.as_str() {
        "init-league" => cmd_init_league(&store, &config, &args),
        "refresh" => cmd_refresh(&store, &config, &args),
        "teams" => cmd_teams(&store, &config, &args),
        "strength" => cmd_strength(&store, &config, &args),
        "odds" => cmd_odds(&store, &config, &args),
        "coverage" => cmd_coverage(&store, &config, &args),
        "table" => cmd_table(&store, &config),
        other => {
            print_usage();
            Err(anyhow!("unknown command: {other}"))
        }
    }
}

fn print_usage() {
    println!("teamstrength <command> [--db path]");
    println!();
    println!("  init-league --league NAME --country NAME [--tier N] [--league-id N] \\");
    println!("              --teams \"Name:apiId,Name:apiId,...\"");
    println!("  refresh     [--scope LEAGUE[,LEAGUE...]] [--params elo,form,...]");
    println!("  teams       [--league NAME]");
    println!("  strength    TEAM [--league NAME]");
    println!("  odds        HOME AWAY [--neutral]");
    println!("  coverage    LEAGUE");
    println!("  table");
}

fn cmd_init_league(store: &Store, config: &Config, args: &[String]) -> Result<()> {
    let league = flag_value(args, "--league").context("--league is required")?;
    let country = flag_value(args, "--country").context("--country is required")?;
    let tier = flag_value(args, "--tier")
        .and_then(|raw| raw.parse::<u8>().ok())
        .unwrap_or(1);
    let league_id = flag_value(args, "--league-id").and_then(|raw| raw.parse::<u32>().ok());
    let kind = if country.eq_ignore_ascii_case("international") {
        CompetitionKind::International
    } else {
        CompetitionKind::DomesticLeague
    };

    let competition_id =
        store.upsert_competition(&league, &country, kind, &config.season, tier, league_id)?;

    let mut added = 0usize;
    if let Some(raw) = flag_value(args, "--teams") {
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, api_id) = match entry.split_once(':') {
                Some((name, id)) => (name.trim(), id.trim().parse::<u32>().ok()),
                None => (entry, None),
            };
            let team_id = store.upsert_team(name, api_id, None)?;
            store.ensure_record(team_id, competition_id, &config.season)?;
            added += 1;
        }
    }
    println!("{league} ({}) ready, {added} teams registered", config.season);
    Ok(())
}

fn cmd_refresh(store: &Store, config: &Config, args: &[String]) -> Result<()> {
    let provider = http_provider(config)?;
    let sources = Sources {
        ratings: SourceHandle::new("api-football", provider.clone()),
        fixtures: SourceHandle::new("api-football", provider.clone()),
        standings: SourceHandle::new("api-football", provider.clone()),
        squads: SourceHandle::new("api-football", provider.clone()),
        stats: SourceHandle::new("api-football", provider.clone()),
    };
    let orchestrator = Orchestrator::new(config.clone(), standard_collectors(&sources))?
        .with_match_ingest(provider);

    let scope = match flag_value(args, "--scope") {
        Some(raw) => {
            let mut ids = Vec::new();
            for name in raw.split(',') {
                let name = name.trim();
                let competition = store
                    .get_competition_by_name(name, &config.season)?
                    .ok_or_else(|| anyhow!("unknown competition: {name}"))?;
                ids.push(competition.id);
            }
            RefreshScope::Competitions(ids)
        }
        None => RefreshScope::All,
    };
    let parameters = flag_value(args, "--params")
        .map(|raw| {
            raw.split(',')
                .filter_map(|key| Parameter::from_key(key.trim()))
                .collect::<HashSet<_>>()
        })
        .filter(|set| !set.is_empty());

    let summary = orchestrator.run_with(
        store,
        scope,
        parameters.as_ref(),
        &Default::default(),
    )?;

    println!("Refresh cycle complete (run {})", summary.run_id);
    println!(
        "Collected {}/{} values, {} fixtures mirrored, in {:.1}s",
        summary.succeeded(),
        summary.attempted(),
        summary.matches_ingested,
        summary.wall_time.as_secs_f64()
    );
    let mut parameters: Vec<_> = summary.per_parameter.iter().collect();
    parameters.sort_by_key(|(p, _)| p.index());
    for (parameter, outcome) in parameters {
        println!(
            "  {parameter}: {}/{} ok, {} transient, {} permanent",
            outcome.succeeded,
            outcome.attempted,
            outcome.failed_transient,
            outcome.failed_permanent
        );
    }
    for competition in &summary.competitions {
        println!(
            "  {}: coverage {:.0}%",
            competition.name,
            competition.coverage * 100.0
        );
    }
    if !summary.errors.is_empty() {
        println!("  errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(8) {
            println!("   - {err}");
        }
    }
    println!("Snapshot timestamp: {}", summary.finished_at);
    Ok(())
}

fn cmd_teams(store: &Store, config: &Config, args: &[String]) -> Result<()> {
    let queries = Queries::new(store, &config.season);
    let league = flag_value(args, "--league");
    let directory = queries.team_directory(league.as_deref())?;
    for entry in directory {
        println!(
            "{:<28} {:<10} {}",
            entry.name,
            entry.confederation.as_deref().unwrap_or("-"),
            entry.competitions.join(", ")
        );
    }
    Ok(())
}

fn cmd_strength(store: &Store, config: &Config, args: &[String]) -> Result<()> {
    let team = positional(args, 1).context("team name required")?;
    let queries = Queries::new(store, &config.season);
    let views = queries.strength(&team, flag_value(args, "--league").as_deref())?;
    for view in views {
        println!("{} - {} ({})", view.team, view.competition, view.season);
        match view.strength_percentage {
            Some(pct) => println!("  overall {:.2}%", pct),
            None => println!("  overall n/a"),
        }
        println!(
            "  local {}  european {}  confidence {}",
            fmt_opt(view.local_league_strength),
            fmt_opt(view.european_strength),
            fmt_opt(view.confidence)
        );
        for (parameter, value) in &view.normalized {
            println!("    {parameter:<24} {}", fmt_opt(*value));
        }
        if let Some(updated) = &view.last_updated {
            println!("  updated {updated}");
        }
    }
    Ok(())
}

fn cmd_odds(store: &Store, config: &Config, args: &[String]) -> Result<()> {
    let home = positional(args, 1).context("home team required")?;
    let away = positional(args, 2).context("away team required")?;
    let neutral = has_flag(args, "--neutral");
    let queries = Queries::new(store, &config.season);
    let engine = OddsEngine::new(config.odds, config.coverage_policy);
    let sheet = queries.odds(&engine, &home, &away, neutral)?;

    println!(
        "{} vs {} [{}]{}",
        sheet.home_team,
        sheet.away_team,
        sheet.rationale,
        if sheet.neutral_venue { " (neutral)" } else { "" }
    );
    println!(
        "  1X2   H {:.1}% @ {:.2}   D {:.1}% @ {:.2}   A {:.1}% @ {:.2}",
        sheet.one_x_two.home.probability * 100.0,
        sheet.one_x_two.home.decimal_odds,
        sheet.one_x_two.draw.probability * 100.0,
        sheet.one_x_two.draw.decimal_odds,
        sheet.one_x_two.away.probability * 100.0,
        sheet.one_x_two.away.decimal_odds,
    );
    println!(
        "  O/U 2.5   over {:.1}% @ {:.2}   under {:.1}% @ {:.2}",
        sheet.goals.over.probability * 100.0,
        sheet.goals.over.decimal_odds,
        sheet.goals.under.probability * 100.0,
        sheet.goals.under.decimal_odds,
    );
    println!(
        "  BTTS   yes {:.1}% @ {:.2}   no {:.1}% @ {:.2}",
        sheet.btts.yes.probability * 100.0,
        sheet.btts.yes.decimal_odds,
        sheet.btts.no.probability * 100.0,
        sheet.btts.no.decimal_odds,
    );
    println!(
        "  expected goals {:.2}   likely score {}   confidence {:.0}%",
        sheet.expected_goals,
        sheet.likely_score,
        sheet.confidence * 100.0
    );
    Ok(())
}

fn cmd_coverage(store: &Store, config: &Config, args: &[String]) -> Result<()> {
    let league = positional(args, 1).context("league name required")?;
    let queries = Queries::new(store, &config.season);
    let coverage = queries.coverage(&league)?;
    println!(
        "{} ({}) - {} teams, coverage {:.0}%",
        coverage.competition_name,
        coverage.season,
        coverage.team_count,
        coverage.coverage_fraction() * 100.0
    );
    for parameter in &coverage.parameters {
        println!(
            "  {:<24} {}/{}  raw [{} .. {}] avg {}",
            parameter.parameter.key(),
            parameter.non_null,
            coverage.team_count,
            fmt_opt(parameter.raw_min),
            fmt_opt(parameter.raw_max),
            fmt_opt(parameter.raw_avg)
        );
    }
    println!(
        "  freshness: oldest {}  newest {}",
        coverage.oldest_update.as_deref().unwrap_or("n/a"),
        coverage.newest_update.as_deref().unwrap_or("n/a")
    );
    Ok(())
}

fn cmd_table(store: &Store, config: &Config) -> Result<()> {
    let queries = Queries::new(store, &config.season);
    let rows = queries.cross_league_table()?;
    for (rank, row) in rows.iter().enumerate() {
        println!(
            "{:>3}. {:<28} {:<18} european {:.3}  local {}",
            rank + 1,
            row.team,
            row.competition,
            row.european_strength.unwrap_or(0.0),
            fmt_opt(row.local_league_strength)
        );
    }
    Ok(())
}

fn http_provider(config: &Config) -> Result<Arc<HttpApiProvider>> {
    let base_url = std::env::var("APP_API_BASE_URL")
        .context("APP_API_BASE_URL must point at the football data provider")?;
    let api_key = std::env::var("APP_API_KEY").context("APP_API_KEY is required for refresh")?;
    Ok(Arc::new(HttpApiProvider::new(
        base_url,
        api_key,
        config.concurrency_per_provider,
    )))
}

fn db_path(args: &[String]) -> PathBuf {
    flag_value(args, "--db")
        .map(PathBuf::from)
        .or_else(|| std::env::var("APP_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("teamstrength.sqlite"))
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&format!("{flag}=")) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.starts_with("--")
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

/// Positional argument after the command, skipping flags and their values.
fn positional(args: &[String], index: usize) -> Option<String> {
    let mut seen = 0usize;
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with("--") {
            skip_next = !arg.contains('=') && !matches!(arg.as_str(), "--neutral");
            continue;
        }
        if seen == index {
            return Some(arg.clone());
        }
        seen += 1;
    }
    None
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.3}"),
        None => "n/a".to_string(),
    }
}
