use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use teamstrength::collectors::{EloCollector, SourceHandle, Sources, standard_collectors};
use teamstrength::config::{Config, RetryConfig};
use teamstrength::model::CompetitionKind;
use teamstrength::orchestrator::{CancelToken, Orchestrator, RefreshScope};
use teamstrength::params::Parameter;
use teamstrength::providers::{
    FixtureRecord, LeagueKey, PlayerRecord, ProviderError, RatingSource, SquadSnapshot,
    StandingRow, StaticProvider, TeamKey, TeamSeasonStats,
};
use teamstrength::store::Store;

const LEAGUE: &str = "Premier League";

fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry = RetryConfig {
        initial: Duration::from_millis(1),
        factor: 2.0,
        cap: Duration::from_millis(20),
        max_attempts: 5,
    };
    config.concurrency_per_provider = 2;
    config.cycle_deadline = Duration::from_secs(30);
    config.call_deadline = Duration::from_secs(5);
    config
}

fn seeded_store() -> (Store, i64) {
    let store = Store::open_in_memory().unwrap();
    let competition = store
        .upsert_competition(
            LEAGUE,
            "England",
            CompetitionKind::DomesticLeague,
            "2024",
            1,
            Some(39),
        )
        .unwrap();
    for (name, api_id) in [("Arsenal", 1), ("Chelsea", 2), ("Everton", 3)] {
        let team = store.upsert_team(name, Some(api_id), Some("UEFA")).unwrap();
        store.ensure_record(team, competition, "2024").unwrap();
    }
    (store, competition)
}

fn fixture(id: u64, date: &str, home: (u32, &str), away: (u32, &str), hg: i32, ag: i32) -> FixtureRecord {
    FixtureRecord {
        fixture_id: id,
        utc_time: date.to_string(),
        home: TeamKey {
            name: home.1.to_string(),
            api_id: Some(home.0),
        },
        away: TeamKey {
            name: away.1.to_string(),
            api_id: Some(away.0),
        },
        home_goals: Some(hg),
        away_goals: Some(ag),
        finished: true,
    }
}

fn squad(base_value: f64, injured_star: bool) -> SquadSnapshot {
    let mut players: Vec<PlayerRecord> = (0..22)
        .map(|i| PlayerRecord {
            name: format!("player-{i}"),
            role: if i < 2 { "Goalkeeper" } else { "Midfielder" }.to_string(),
            market_value: Some(base_value + i as f64),
            fit: true,
        })
        .collect();
    players[21].market_value = Some(base_value * 4.0);
    players[21].fit = !injured_star;
    SquadSnapshot { players }
}

fn full_provider() -> StaticProvider {
    let fixtures = vec![
        fixture(101, "2024-08-10T15:00:00Z", (1, "Arsenal"), (2, "Chelsea"), 2, 0),
        fixture(102, "2024-08-17T15:00:00Z", (2, "Chelsea"), (3, "Everton"), 1, 1),
        fixture(103, "2024-08-24T15:00:00Z", (3, "Everton"), (1, "Arsenal"), 0, 3),
        fixture(104, "2024-09-01T15:00:00Z", (2, "Chelsea"), (1, "Arsenal"), 2, 1),
        fixture(105, "2024-09-08T15:00:00Z", (1, "Arsenal"), (3, "Everton"), 4, 0),
        fixture(106, "2024-09-15T15:00:00Z", (3, "Everton"), (2, "Chelsea"), 1, 2),
    ];
    let standings = vec![
        StandingRow {
            team: TeamKey {
                name: "Arsenal".to_string(),
                api_id: Some(1),
            },
            position: 1,
            points: 9,
        },
        StandingRow {
            team: TeamKey {
                name: "Chelsea".to_string(),
                api_id: Some(2),
            },
            position: 2,
            points: 7,
        },
        StandingRow {
            team: TeamKey {
                name: "Everton".to_string(),
                api_id: Some(3),
            },
            position: 3,
            points: 1,
        },
    ];
    StaticProvider::new()
        .with_rating("Arsenal", 1720.0)
        .with_rating("Chelsea", 1580.0)
        .with_rating("Everton", 1405.0)
        .with_fixtures(LEAGUE, fixtures)
        .with_standings(LEAGUE, standings)
        .with_squad("Arsenal", squad(30.0, false))
        .with_squad("Chelsea", squad(22.0, true))
        .with_squad("Everton", squad(8.0, false))
        .with_stats(
            "Arsenal",
            TeamSeasonStats {
                matches_played: 4,
                goals_for: 10,
                goals_against: 2,
                possession_pct: Some(58.0),
                shots_per_match: Some(16.0),
                clean_sheets: 3,
            },
        )
        .with_stats(
            "Chelsea",
            TeamSeasonStats {
                matches_played: 4,
                goals_for: 6,
                goals_against: 5,
                possession_pct: Some(52.0),
                shots_per_match: Some(12.0),
                clean_sheets: 1,
            },
        )
        .with_stats(
            "Everton",
            TeamSeasonStats {
                matches_played: 4,
                goals_for: 2,
                goals_against: 10,
                possession_pct: Some(41.0),
                shots_per_match: Some(8.0),
                clean_sheets: 0,
            },
        )
}

fn full_sources(provider: Arc<StaticProvider>) -> Sources {
    Sources {
        ratings: SourceHandle::new("static", provider.clone()),
        fixtures: SourceHandle::new("static", provider.clone()),
        standings: SourceHandle::new("static", provider.clone()),
        squads: SourceHandle::new("static", provider.clone()),
        stats: SourceHandle::new("static", provider),
    }
}

#[test]
fn full_cycle_collects_normalizes_and_aggregates() {
    let (store, competition) = seeded_store();
    let sources = full_sources(Arc::new(full_provider()));
    let orchestrator = Orchestrator::new(fast_config(), standard_collectors(&sources)).unwrap();

    let summary = orchestrator.run(&store, RefreshScope::All).unwrap();

    // 3 teams x 10 parameters, everything collectable from the fixture data.
    assert_eq!(summary.attempted(), 30);
    assert_eq!(summary.succeeded(), 30);
    assert_eq!(summary.failed(), 0);

    let records = store.records_for_competition(competition).unwrap();
    assert_eq!(records.len(), 3);
    for record in &records {
        assert!(record.raw.is_complete(), "{} raw incomplete", record.team_name);
        assert!(
            record.overall_strength.is_some(),
            "{} missing overall strength",
            record.team_name
        );
        assert_eq!(record.confidence, Some(1.0));
        assert!(record.local_league_strength.is_some());
        assert!(record.european_strength.is_some());
    }

    // Arsenal leads every signal, so it must top the league scale.
    let arsenal = records.iter().find(|r| r.team_name == "Arsenal").unwrap();
    let everton = records.iter().find(|r| r.team_name == "Everton").unwrap();
    assert_eq!(arsenal.local_league_strength, Some(1.0));
    assert_eq!(everton.local_league_strength, Some(0.0));
    assert!(arsenal.overall_strength > everton.overall_strength);

    assert_eq!(summary.competitions.len(), 1);
    assert!((summary.competitions[0].coverage - 1.0).abs() < 1e-12);
    assert!(!summary.finished_at.is_empty());
}

#[test]
fn match_ingest_mirrors_provider_fixtures() {
    let (store, competition) = seeded_store();
    let provider = Arc::new(full_provider());
    let sources = full_sources(provider.clone());
    let orchestrator = Orchestrator::new(fast_config(), standard_collectors(&sources))
        .unwrap()
        .with_match_ingest(provider);

    let summary = orchestrator.run(&store, RefreshScope::All).unwrap();
    assert_eq!(summary.matches_ingested, 6);

    let finished = store.finished_matches(competition).unwrap();
    assert_eq!(finished.len(), 6);
    // Fixture ids are the provider's; re-running must not duplicate rows.
    orchestrator.run(&store, RefreshScope::All).unwrap();
    assert_eq!(store.finished_matches(competition).unwrap().len(), 6);
}

#[test]
fn parameter_subset_leaves_other_cells_untouched() {
    let (store, competition) = seeded_store();
    let sources = full_sources(Arc::new(full_provider()));
    let orchestrator = Orchestrator::new(fast_config(), standard_collectors(&sources)).unwrap();

    let only_elo: HashSet<Parameter> = [Parameter::Elo].into_iter().collect();
    let summary = orchestrator
        .run_with(&store, RefreshScope::All, Some(&only_elo), &CancelToken::new())
        .unwrap();

    assert_eq!(summary.attempted(), 3);
    for record in store.records_for_competition(competition).unwrap() {
        assert!(record.raw.get(Parameter::Elo).is_some());
        assert!(record.raw.get(Parameter::Form).is_none());
        assert!(record.raw.get(Parameter::SquadValue).is_none());
    }
}

struct FlakyRatings {
    calls: AtomicU32,
    fail_first: u32,
}

impl RatingSource for FlakyRatings {
    fn team_rating(
        &self,
        _team: &TeamKey,
        _league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<f64, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(ProviderError::Transient("simulated outage".to_string()))
        } else {
            Ok(1500.0 + call as f64)
        }
    }
}

#[test]
fn transient_failures_are_retried_with_backoff() {
    let (store, competition) = seeded_store();
    let flaky = Arc::new(FlakyRatings {
        calls: AtomicU32::new(0),
        fail_first: 2,
    });
    let orchestrator = Orchestrator::new(
        fast_config(),
        vec![Arc::new(EloCollector::new("flaky", flaky.clone())) as _],
    )
    .unwrap();

    let summary = orchestrator.run(&store, RefreshScope::All).unwrap();
    assert_eq!(summary.succeeded(), 3);
    assert_eq!(summary.failed(), 0);
    assert!(flaky.calls.load(Ordering::SeqCst) >= 5);

    for record in store.records_for_competition(competition).unwrap() {
        assert!(record.raw.get(Parameter::Elo).is_some());
    }
}

struct AlwaysDown;

impl RatingSource for AlwaysDown {
    fn team_rating(
        &self,
        _team: &TeamKey,
        _league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<f64, ProviderError> {
        Err(ProviderError::Transient("still down".to_string()))
    }
}

#[test]
fn exhausted_retries_surface_as_transient_failures() {
    let (store, _) = seeded_store();
    let orchestrator = Orchestrator::new(
        fast_config(),
        vec![Arc::new(EloCollector::new("down", Arc::new(AlwaysDown))) as _],
    )
    .unwrap();

    let summary = orchestrator.run(&store, RefreshScope::All).unwrap();
    assert_eq!(summary.succeeded(), 0);
    let outcome = summary.per_parameter[&Parameter::Elo];
    assert_eq!(outcome.failed_transient, 3);
    assert_eq!(outcome.failed_permanent, 0);
}

struct UnknownTeams;

impl RatingSource for UnknownTeams {
    fn team_rating(
        &self,
        team: &TeamKey,
        _league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<f64, ProviderError> {
        Err(ProviderError::Permanent(format!("unknown team {}", team.name)))
    }
}

#[test]
fn permanent_failures_keep_the_last_good_value() {
    let (store, competition) = seeded_store();

    // First cycle lands good ratings.
    let good = full_sources(Arc::new(full_provider()));
    let orchestrator =
        Orchestrator::new(fast_config(), standard_collectors(&good)).unwrap();
    orchestrator.run(&store, RefreshScope::All).unwrap();
    let before: Vec<Option<f64>> = store
        .records_for_competition(competition)
        .unwrap()
        .iter()
        .map(|r| r.raw.get(Parameter::Elo))
        .collect();

    // Second cycle: the rating provider no longer knows anyone.
    let broken = Orchestrator::new(
        fast_config(),
        vec![Arc::new(EloCollector::new("broken", Arc::new(UnknownTeams))) as _],
    )
    .unwrap();
    let summary = broken.run(&store, RefreshScope::All).unwrap();
    assert_eq!(summary.per_parameter[&Parameter::Elo].failed_permanent, 3);

    let after: Vec<Option<f64>> = store
        .records_for_competition(competition)
        .unwrap()
        .iter()
        .map(|r| r.raw.get(Parameter::Elo))
        .collect();
    assert_eq!(before, after);
}

struct NegativeRatings;

impl RatingSource for NegativeRatings {
    fn team_rating(
        &self,
        _team: &TeamKey,
        _league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<f64, ProviderError> {
        Ok(-42.0)
    }
}

#[test]
fn out_of_range_values_are_rejected_not_stored() {
    let (store, competition) = seeded_store();
    let orchestrator = Orchestrator::new(
        fast_config(),
        vec![Arc::new(EloCollector::new("bad", Arc::new(NegativeRatings))) as _],
    )
    .unwrap();

    let summary = orchestrator.run(&store, RefreshScope::All).unwrap();
    assert_eq!(summary.per_parameter[&Parameter::Elo].failed_permanent, 3);
    for record in store.records_for_competition(competition).unwrap() {
        assert_eq!(record.raw.get(Parameter::Elo), None);
    }
}

#[test]
fn cancelled_cycle_collects_nothing() {
    let (store, competition) = seeded_store();
    let sources = full_sources(Arc::new(full_provider()));
    let orchestrator = Orchestrator::new(fast_config(), standard_collectors(&sources)).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = orchestrator
        .run_with(&store, RefreshScope::All, None, &cancel)
        .unwrap();
    assert_eq!(summary.succeeded(), 0);
    for record in store.records_for_competition(competition).unwrap() {
        assert!(record.raw.missing().len() == Parameter::COUNT);
    }
}

#[test]
fn invalid_configuration_refuses_to_construct() {
    let mut config = fast_config();
    config.odds.margin = 2.0;
    let sources = full_sources(Arc::new(full_provider()));
    assert!(Orchestrator::new(config, standard_collectors(&sources)).is_err());
}

#[test]
fn scoped_refresh_only_touches_named_competitions() {
    let (store, premier) = seeded_store();
    let other = store
        .upsert_competition(
            "La Liga",
            "Spain",
            CompetitionKind::DomesticLeague,
            "2024",
            1,
            None,
        )
        .unwrap();
    let real = store.upsert_team("Real Madrid", Some(50), None).unwrap();
    store.ensure_record(real, other, "2024").unwrap();

    let sources = full_sources(Arc::new(full_provider()));
    let orchestrator = Orchestrator::new(fast_config(), standard_collectors(&sources)).unwrap();
    let summary = orchestrator
        .run(&store, RefreshScope::Competitions(vec![premier]))
        .unwrap();

    // Only the premier league's 3 teams were attempted.
    assert_eq!(summary.attempted(), 30);
    let laliga = store.records_for_competition(other).unwrap();
    assert_eq!(laliga[0].raw.missing().len(), Parameter::COUNT);
}
