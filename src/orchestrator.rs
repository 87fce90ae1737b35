use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::collectors::{Collector, CollectorRequest};
use crate::config::Config;
use crate::model::Competition;
use crate::params::Parameter;
use crate::providers::{LeagueKey, ProviderError, TeamKey};
use crate::store::Store;
use crate::strength;

/// Which competitions a refresh covers.
#[derive(Debug, Clone, Default)]
pub enum RefreshScope {
    /// Every competition in the active season.
    #[default]
    All,
    Competitions(Vec<i64>),
}

/// Cooperative cancellation: in-flight calls finish or abort, nothing else
/// starts, no partial rows are written.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
}

#[derive(Debug, Clone)]
pub struct CompetitionOutcome {
    pub competition_id: i64,
    pub name: String,
    pub coverage: f64,
}

/// Structured result of one refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub run_id: i64,
    pub per_parameter: HashMap<Parameter, ParameterOutcome>,
    pub competitions: Vec<CompetitionOutcome>,
    pub matches_ingested: usize,
    pub wall_time: Duration,
    /// Consumers needing a consistent snapshot key off this timestamp.
    pub finished_at: String,
    pub errors: Vec<String>,
}

impl RefreshSummary {
    pub fn attempted(&self) -> usize {
        self.per_parameter.values().map(|o| o.attempted).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.per_parameter.values().map(|o| o.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.per_parameter
            .values()
            .map(|o| o.failed_transient + o.failed_permanent)
            .sum()
    }
}

struct Job {
    collector: Arc<dyn Collector>,
    request: CollectorRequest,
    record_id: i64,
}

struct JobResult {
    record_id: i64,
    parameter: Parameter,
    result: Result<f64, ProviderError>,
    attempts: u32,
}

/// Runs one refresh cycle: collection fan-out with per-provider bounded
/// pools, a single writer applying raw upserts, then normalization and
/// aggregation over the snapshot those writes produced. Late work past the
/// cycle deadline is recorded as transient failure and deferred.
pub struct Orchestrator {
    config: Config,
    collectors: Vec<Arc<dyn Collector>>,
    fixtures: Option<Arc<dyn crate::providers::FixtureSource>>,
}

impl Orchestrator {
    pub fn new(config: Config, collectors: Vec<Arc<dyn Collector>>) -> Result<Self> {
        config.validate().context("refusing to run refresh")?;
        if collectors.is_empty() {
            return Err(anyhow!("no collectors configured"));
        }
        Ok(Self {
            config,
            collectors,
            fixtures: None,
        })
    }

    /// Also mirror the provider's fixtures into the match store each cycle.
    pub fn with_match_ingest(mut self, fixtures: Arc<dyn crate::providers::FixtureSource>) -> Self {
        self.fixtures = Some(fixtures);
        self
    }

    pub fn run(&self, store: &Store, scope: RefreshScope) -> Result<RefreshSummary> {
        self.run_with(store, scope, None, &CancelToken::new())
    }

    /// Full-control entry point: optional parameter subset and cancellation.
    pub fn run_with(
        &self,
        store: &Store,
        scope: RefreshScope,
        parameters: Option<&HashSet<Parameter>>,
        cancel: &CancelToken,
    ) -> Result<RefreshSummary> {
        let started = Instant::now();
        let cycle_deadline = started + self.config.cycle_deadline;

        let competitions = self.resolve_scope(store, &scope)?;
        if competitions.is_empty() {
            return Err(anyhow!("refresh scope resolved to no competitions"));
        }
        let scope_label = competitions
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
            .join(",");
        let run_id = store.insert_refresh_run(&scope_label)?;
        info!(run_id, scope = %scope_label, "refresh cycle started");

        let mut matches_ingested = 0usize;
        let jobs = self.build_jobs(store, &competitions, parameters)?;
        let (results, errors) = self.collect_all(jobs, cycle_deadline, cancel);
        let mut errors = errors;

        if let Some(fixtures) = &self.fixtures
            && !cancel.is_cancelled()
        {
            match ingest_matches(store, fixtures.as_ref(), &competitions, cycle_deadline) {
                Ok(count) => matches_ingested = count,
                Err(err) => errors.push(format!("match ingest: {err}")),
            }
        }

        // Single writer: raw upserts apply here, so normalization below sees
        // a settled snapshot. Whatever failed keeps its last good value.
        let mut per_parameter: HashMap<Parameter, ParameterOutcome> = HashMap::new();
        for item in results {
            let outcome = per_parameter.entry(item.parameter).or_default();
            outcome.attempted += 1;
            match item.result {
                Ok(value) => {
                    // One immediate retry covers a briefly locked database;
                    // past that the value is lost for this cycle only.
                    let write = store
                        .upsert_raw_value(item.record_id, item.parameter, value)
                        .or_else(|_| store.upsert_raw_value(item.record_id, item.parameter, value));
                    match write {
                        Ok(()) => outcome.succeeded += 1,
                        Err(err) => {
                            outcome.failed_transient += 1;
                            warn!(parameter = %item.parameter, error = %err, "raw write failed");
                            errors.push(format!("{}: storage: {err}", item.parameter));
                        }
                    }
                }
                Err(err) => {
                    if err.is_transient() {
                        outcome.failed_transient += 1;
                    } else {
                        outcome.failed_permanent += 1;
                    }
                    warn!(
                        parameter = %item.parameter,
                        attempts = item.attempts,
                        error = %err,
                        "collection failed"
                    );
                    errors.push(format!("{}: {err}", item.parameter));
                }
            }
        }

        for competition in &competitions {
            strength::recompute_competition(
                store,
                competition.id,
                &self.config.weights,
                self.config.coverage_policy,
            )?;
            strength::recompute_local_league(store, competition.id)?;
        }
        strength::recompute_european(
            store,
            &self.config.season,
            &self.config.weights,
            self.config.coverage_policy,
        )?;

        let mut outcomes = Vec::with_capacity(competitions.len());
        for competition in &competitions {
            if let Some(coverage) = store.coverage(competition.id)? {
                outcomes.push(CompetitionOutcome {
                    competition_id: competition.id,
                    name: competition.name.clone(),
                    coverage: coverage.coverage_fraction(),
                });
            }
        }

        let summary = RefreshSummary {
            run_id,
            per_parameter,
            competitions: outcomes,
            matches_ingested,
            wall_time: started.elapsed(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            errors,
        };
        store.finish_refresh_run(
            run_id,
            summary.attempted(),
            summary.succeeded(),
            summary.failed(),
            &summary.errors,
        )?;
        info!(
            run_id,
            attempted = summary.attempted(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            wall_ms = summary.wall_time.as_millis() as u64,
            "refresh cycle finished"
        );
        Ok(summary)
    }

    fn resolve_scope(&self, store: &Store, scope: &RefreshScope) -> Result<Vec<Competition>> {
        match scope {
            RefreshScope::All => store.list_competitions(Some(&self.config.season)),
            RefreshScope::Competitions(ids) => {
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    let competition = store
                        .get_competition(*id)?
                        .ok_or_else(|| anyhow!("unknown competition id {id}"))?;
                    out.push(competition);
                }
                Ok(out)
            }
        }
    }

    fn build_jobs(
        &self,
        store: &Store,
        competitions: &[Competition],
        parameters: Option<&HashSet<Parameter>>,
    ) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for competition in competitions {
            let league = LeagueKey {
                name: competition.name.clone(),
                api_id: competition.api_league_id,
                season: competition.season.clone(),
            };
            for team in store.list_teams(Some(competition.id))? {
                let record_id = store.ensure_record(team.id, competition.id, &competition.season)?;
                for collector in &self.collectors {
                    if let Some(filter) = parameters
                        && !filter.contains(&collector.parameter())
                    {
                        continue;
                    }
                    jobs.push(Job {
                        collector: collector.clone(),
                        request: CollectorRequest {
                            team: TeamKey {
                                name: team.name.clone(),
                                api_id: team.api_team_id,
                            },
                            league: league.clone(),
                            // Placeholder; stamped per attempt below.
                            deadline: Instant::now(),
                        },
                        record_id,
                    });
                }
            }
        }
        Ok(jobs)
    }

    /// Fan jobs out over one bounded pool per provider and drain everything
    /// back through a channel. Returns when every job has reported.
    fn collect_all(
        &self,
        jobs: Vec<Job>,
        cycle_deadline: Instant,
        cancel: &CancelToken,
    ) -> (Vec<JobResult>, Vec<String>) {
        let mut by_provider: HashMap<String, Vec<Job>> = HashMap::new();
        for job in jobs {
            by_provider
                .entry(job.collector.provider().to_string())
                .or_default()
                .push(job);
        }

        let (tx, rx) = mpsc::channel::<JobResult>();
        let mut pools = Vec::new();
        let mut errors = Vec::new();

        for (provider, provider_jobs) in by_provider {
            let pool = match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.concurrency_per_provider)
                .thread_name(move |i| format!("collect-{provider}-{i}"))
                .build()
            {
                Ok(pool) => pool,
                Err(err) => {
                    errors.push(format!("worker pool: {err}"));
                    continue;
                }
            };
            for job in provider_jobs {
                let tx = tx.clone();
                let retry = self.config.retry;
                let call_deadline = self.config.call_deadline;
                let cancel = cancel.clone();
                pool.spawn(move || {
                    let result = run_job(&job, retry, call_deadline, cycle_deadline, &cancel);
                    let _ = tx.send(result);
                });
            }
            pools.push(pool);
        }
        drop(tx);

        let mut results = Vec::new();
        while let Ok(item) = rx.recv() {
            results.push(item);
        }
        drop(pools);
        (results, errors)
    }
}

/// Mirror provider fixtures into the match store for the refreshed scope.
/// Fixtures whose teams are not on record are skipped, not invented.
fn ingest_matches(
    store: &Store,
    fixtures: &dyn crate::providers::FixtureSource,
    competitions: &[Competition],
    cycle_deadline: Instant,
) -> Result<usize> {
    let mut ingested = 0usize;
    for competition in competitions {
        let league = LeagueKey {
            name: competition.name.clone(),
            api_id: competition.api_league_id,
            season: competition.season.clone(),
        };
        let rows = match fixtures.league_fixtures(&league, cycle_deadline) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(competition = %competition.name, error = %err, "fixture ingest skipped");
                continue;
            }
        };
        for fixture in rows {
            let (Some(home_api), Some(away_api)) = (fixture.home.api_id, fixture.away.api_id)
            else {
                continue;
            };
            let (Some(home_id), Some(away_id)) = (
                store.team_id_by_api(home_api)?,
                store.team_id_by_api(away_api)?,
            ) else {
                continue;
            };
            store.upsert_match(&crate::model::StoredMatch {
                match_id: fixture.fixture_id,
                competition_id: competition.id,
                season: competition.season.clone(),
                utc_time: fixture.utc_time.clone(),
                home_team_id: home_id,
                away_team_id: away_id,
                home_goals: fixture.home_goals,
                away_goals: fixture.away_goals,
                finished: fixture.finished,
            })?;
            ingested += 1;
        }
    }
    Ok(ingested)
}

fn run_job(
    job: &Job,
    retry: crate::config::RetryConfig,
    call_deadline: Duration,
    cycle_deadline: Instant,
    cancel: &CancelToken,
) -> JobResult {
    let parameter = job.collector.parameter();
    let mut last_err = ProviderError::Transient("not attempted".to_string());
    for attempt in 1..=retry.max_attempts {
        if cancel.is_cancelled() {
            return JobResult {
                record_id: job.record_id,
                parameter,
                result: Err(ProviderError::Transient("cancelled".to_string())),
                attempts: attempt - 1,
            };
        }
        let backoff = retry.delay_before(attempt);
        if !backoff.is_zero() {
            // Jitter keeps retries from the same provider pool from aligning.
            let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
            thread::sleep(backoff.mul_f64(jitter));
        }
        if Instant::now() >= cycle_deadline {
            return JobResult {
                record_id: job.record_id,
                parameter,
                result: Err(ProviderError::Transient("cycle deadline reached".to_string())),
                attempts: attempt - 1,
            };
        }

        let mut request = job.request.clone();
        request.deadline = (Instant::now() + call_deadline).min(cycle_deadline);
        match job.collector.collect(&request) {
            Ok(value) => {
                debug!(parameter = %parameter, team = %request.team.name, attempt, "collected");
                return JobResult {
                    record_id: job.record_id,
                    parameter,
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) if err.is_transient() => last_err = err,
            Err(err) => {
                return JobResult {
                    record_id: job.record_id,
                    parameter,
                    result: Err(err),
                    attempts: attempt,
                };
            }
        }
    }
    JobResult {
        record_id: job.record_id,
        parameter,
        result: Err(last_err),
        attempts: retry.max_attempts,
    }
}
