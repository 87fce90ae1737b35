use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::http_client::http_client;

/// Collector-boundary failure taxonomy. Collectors never panic or leak
/// provider internals; they return one of these.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network trouble, timeout, 5xx, rate limit. Worth retrying.
    #[error("transient: {0}")]
    Transient(String),
    /// Unknown team, schema mismatch, other 4xx. Not retryable; the last
    /// good stored value stays untouched.
    #[error("permanent: {0}")]
    Permanent(String),
    /// Value outside the admissible range. Handled like a permanent failure.
    #[error("invalid value: {0}")]
    Invalid(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// How a provider authenticates. Credentials themselves are injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    ApiKeyHeader(&'static str),
}

/// Stable identity + outbound limits for one external provider.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name: String,
    pub concurrency: usize,
    pub auth: AuthMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamKey {
    pub name: String,
    pub api_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueKey {
    pub name: String,
    pub api_id: Option<u32>,
    pub season: String,
}

/// One fixture as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub fixture_id: u64,
    pub utc_time: String,
    pub home: TeamKey,
    pub away: TeamKey,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandingRow {
    pub team: TeamKey,
    pub position: u32,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    pub role: String,
    pub market_value: Option<f64>,
    pub fit: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SquadSnapshot {
    pub players: Vec<PlayerRecord>,
}

impl SquadSnapshot {
    pub fn size(&self) -> usize {
        self.players.len()
    }

    pub fn total_value(&self) -> f64 {
        self.players
            .iter()
            .filter_map(|p| p.market_value)
            .sum::<f64>()
    }
}

/// Season-level team statistics used for the style profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSeasonStats {
    pub matches_played: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    pub possession_pct: Option<f64>,
    pub shots_per_match: Option<f64>,
    pub clean_sheets: u32,
}

// Each collector is constructed against the narrowest source it needs.

pub trait RatingSource: Send + Sync {
    fn team_rating(
        &self,
        team: &TeamKey,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<f64, ProviderError>;
}

pub trait FixtureSource: Send + Sync {
    /// All fixtures of a league season, finished or not.
    fn league_fixtures(
        &self,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<Vec<FixtureRecord>, ProviderError>;
}

pub trait StandingsSource: Send + Sync {
    fn standings(
        &self,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<Vec<StandingRow>, ProviderError>;
}

pub trait SquadSource: Send + Sync {
    fn squad(&self, team: &TeamKey, deadline: Instant) -> Result<SquadSnapshot, ProviderError>;
}

pub trait StatsSource: Send + Sync {
    fn team_statistics(
        &self,
        team: &TeamKey,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<TeamSeasonStats, ProviderError>;
}

/// HTTP provider speaking the api-sports style JSON surface. Base URL and key
/// are injected; nothing here knows about deployments or secrets.
pub struct HttpApiProvider {
    spec: ProviderSpec,
    base_url: String,
    api_key: String,
}

impl HttpApiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, concurrency: usize) -> Self {
        Self {
            spec: ProviderSpec {
                name: "api-football".to_string(),
                concurrency,
                auth: AuthMode::ApiKeyHeader("x-apisports-key"),
            },
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn fetch_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        deadline: Instant,
    ) -> Result<Value, ProviderError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProviderError::Transient("deadline exhausted".to_string()));
        }
        let client = http_client()
            .map_err(|err| ProviderError::Transient(format!("http client: {err}")))?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = client
            .get(&url)
            .header("x-apisports-key", &self.api_key)
            .query(query)
            .timeout(remaining.min(Duration::from_secs(15)))
            .send()
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    ProviderError::Transient(format!("{path}: {err}"))
                } else {
                    ProviderError::Permanent(format!("{path}: {err}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ProviderError::Transient(format!("{path}: http {status}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Permanent(format!("{path}: http {status}")));
        }
        response
            .json::<Value>()
            .map_err(|err| ProviderError::Permanent(format!("{path}: bad json: {err}")))
    }

    fn team_param(team: &TeamKey) -> Result<String, ProviderError> {
        team.api_id
            .map(|id| id.to_string())
            .ok_or_else(|| ProviderError::Permanent(format!("no provider id for {}", team.name)))
    }

    fn league_param(league: &LeagueKey) -> Result<String, ProviderError> {
        league
            .api_id
            .map(|id| id.to_string())
            .ok_or_else(|| ProviderError::Permanent(format!("no provider id for {}", league.name)))
    }
}

impl RatingSource for HttpApiProvider {
    fn team_rating(
        &self,
        team: &TeamKey,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<f64, ProviderError> {
        let body = self.fetch_json(
            "teams/rating",
            &[
                ("team", Self::team_param(team)?),
                ("league", Self::league_param(league)?),
                ("season", league.season.clone()),
            ],
            deadline,
        )?;
        body.pointer("/response/0/rating")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                ProviderError::Permanent(format!("no rating in payload for {}", team.name))
            })
    }
}

impl FixtureSource for HttpApiProvider {
    fn league_fixtures(
        &self,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<Vec<FixtureRecord>, ProviderError> {
        let body = self.fetch_json(
            "fixtures",
            &[
                ("league", Self::league_param(league)?),
                ("season", league.season.clone()),
            ],
            deadline,
        )?;
        let rows = body
            .pointer("/response")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Permanent("fixtures payload missing".to_string()))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(fixture) = parse_fixture(row) {
                out.push(fixture);
            }
        }
        Ok(out)
    }
}

impl StandingsSource for HttpApiProvider {
    fn standings(
        &self,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<Vec<StandingRow>, ProviderError> {
        let body = self.fetch_json(
            "standings",
            &[
                ("league", Self::league_param(league)?),
                ("season", league.season.clone()),
            ],
            deadline,
        )?;
        let rows = body
            .pointer("/response/0/league/standings/0")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Permanent("standings payload missing".to_string()))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let team_name = row
                .pointer("/team/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let Some(position) = row.pointer("/rank").and_then(Value::as_u64) else {
                continue;
            };
            out.push(StandingRow {
                team: TeamKey {
                    name: team_name.to_string(),
                    api_id: row
                        .pointer("/team/id")
                        .and_then(Value::as_u64)
                        .map(|id| id as u32),
                },
                position: position as u32,
                points: row.pointer("/points").and_then(Value::as_u64).unwrap_or(0) as u32,
            });
        }
        Ok(out)
    }
}

impl SquadSource for HttpApiProvider {
    fn squad(&self, team: &TeamKey, deadline: Instant) -> Result<SquadSnapshot, ProviderError> {
        let body = self.fetch_json(
            "players/squads",
            &[("team", Self::team_param(team)?)],
            deadline,
        )?;
        let rows = body
            .pointer("/response/0/players")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Permanent("squad payload missing".to_string()))?;
        let players = rows
            .iter()
            .map(|row| PlayerRecord {
                name: row
                    .pointer("/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                role: row
                    .pointer("/position")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                market_value: row.pointer("/market_value").and_then(Value::as_f64),
                fit: row
                    .pointer("/injured")
                    .and_then(Value::as_bool)
                    .map(|injured| !injured)
                    .unwrap_or(true),
            })
            .collect();
        Ok(SquadSnapshot { players })
    }
}

impl StatsSource for HttpApiProvider {
    fn team_statistics(
        &self,
        team: &TeamKey,
        league: &LeagueKey,
        deadline: Instant,
    ) -> Result<TeamSeasonStats, ProviderError> {
        let body = self.fetch_json(
            "teams/statistics",
            &[
                ("team", Self::team_param(team)?),
                ("league", Self::league_param(league)?),
                ("season", league.season.clone()),
            ],
            deadline,
        )?;
        let root = body
            .pointer("/response")
            .ok_or_else(|| ProviderError::Permanent("statistics payload missing".to_string()))?;
        let played = root
            .pointer("/fixtures/played/total")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        Ok(TeamSeasonStats {
            matches_played: played,
            goals_for: root
                .pointer("/goals/for/total/total")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            goals_against: root
                .pointer("/goals/against/total/total")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            possession_pct: root
                .pointer("/possession/average")
                .and_then(Value::as_str)
                .and_then(|raw| raw.trim_end_matches('%').parse::<f64>().ok()),
            shots_per_match: root
                .pointer("/shots/average")
                .and_then(Value::as_f64),
            clean_sheets: root
                .pointer("/clean_sheet/total")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        })
    }
}

fn parse_fixture(row: &Value) -> Option<FixtureRecord> {
    let fixture_id = row.pointer("/fixture/id").and_then(Value::as_u64)?;
    let status = row
        .pointer("/fixture/status/short")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(FixtureRecord {
        fixture_id,
        utc_time: row
            .pointer("/fixture/date")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        home: TeamKey {
            name: row
                .pointer("/teams/home/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            api_id: row
                .pointer("/teams/home/id")
                .and_then(Value::as_u64)
                .map(|id| id as u32),
        },
        away: TeamKey {
            name: row
                .pointer("/teams/away/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            api_id: row
                .pointer("/teams/away/id")
                .and_then(Value::as_u64)
                .map(|id| id as u32),
        },
        home_goals: row
            .pointer("/goals/home")
            .and_then(Value::as_i64)
            .map(|g| g as i32),
        away_goals: row
            .pointer("/goals/away")
            .and_then(Value::as_i64)
            .map(|g| g as i32),
        finished: status == "FT",
    })
}

/// In-memory provider for tests and offline runs. Everything keyed by team
/// or league name; a lookup miss is a permanent failure, like an unknown
/// team at a real provider.
#[derive(Default)]
pub struct StaticProvider {
    spec_name: String,
    ratings: HashMap<String, f64>,
    fixtures: HashMap<String, Vec<FixtureRecord>>,
    standings: HashMap<String, Vec<StandingRow>>,
    squads: HashMap<String, SquadSnapshot>,
    stats: HashMap<String, TeamSeasonStats>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self {
            spec_name: "static".to_string(),
            ..Default::default()
        }
    }

    pub fn spec(&self) -> ProviderSpec {
        ProviderSpec {
            name: self.spec_name.clone(),
            concurrency: usize::MAX,
            auth: AuthMode::None,
        }
    }

    pub fn with_rating(mut self, team: &str, rating: f64) -> Self {
        self.ratings.insert(team.to_string(), rating);
        self
    }

    pub fn with_fixtures(mut self, league: &str, fixtures: Vec<FixtureRecord>) -> Self {
        self.fixtures.insert(league.to_string(), fixtures);
        self
    }

    pub fn with_standings(mut self, league: &str, rows: Vec<StandingRow>) -> Self {
        self.standings.insert(league.to_string(), rows);
        self
    }

    pub fn with_squad(mut self, team: &str, squad: SquadSnapshot) -> Self {
        self.squads.insert(team.to_string(), squad);
        self
    }

    pub fn with_stats(mut self, team: &str, stats: TeamSeasonStats) -> Self {
        self.stats.insert(team.to_string(), stats);
        self
    }

    fn missing(kind: &str, key: &str) -> ProviderError {
        ProviderError::Permanent(format!("unknown {kind}: {key}"))
    }
}

impl RatingSource for StaticProvider {
    fn team_rating(
        &self,
        team: &TeamKey,
        _league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<f64, ProviderError> {
        self.ratings
            .get(&team.name)
            .copied()
            .ok_or_else(|| Self::missing("team", &team.name))
    }
}

impl FixtureSource for StaticProvider {
    fn league_fixtures(
        &self,
        league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<Vec<FixtureRecord>, ProviderError> {
        self.fixtures
            .get(&league.name)
            .cloned()
            .ok_or_else(|| Self::missing("league", &league.name))
    }
}

impl StandingsSource for StaticProvider {
    fn standings(
        &self,
        league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<Vec<StandingRow>, ProviderError> {
        self.standings
            .get(&league.name)
            .cloned()
            .ok_or_else(|| Self::missing("league", &league.name))
    }
}

impl SquadSource for StaticProvider {
    fn squad(&self, team: &TeamKey, _deadline: Instant) -> Result<SquadSnapshot, ProviderError> {
        self.squads
            .get(&team.name)
            .cloned()
            .ok_or_else(|| Self::missing("team", &team.name))
    }
}

impl StatsSource for StaticProvider {
    fn team_statistics(
        &self,
        team: &TeamKey,
        _league: &LeagueKey,
        _deadline: Instant,
    ) -> Result<TeamSeasonStats, ProviderError> {
        self.stats
            .get(&team.name)
            .cloned()
            .ok_or_else(|| Self::missing("team", &team.name))
    }
}
