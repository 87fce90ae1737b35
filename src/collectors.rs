use std::sync::Arc;
use std::time::Instant;

use crate::model::{MatchOutcome, StoredMatch};
use crate::params::Parameter;
use crate::providers::{
    FixtureRecord, FixtureSource, LeagueKey, ProviderError, RatingSource, SquadSource,
    StandingsSource, StatsSource, TeamKey,
};
use crate::ratings::{self, EloConfig};

/// Recent-form window and recency decay: most recent match weight 1.0, each
/// earlier match multiplied by 0.9.
pub const FORM_MATCHES: usize = 5;
pub const FORM_DECAY: f64 = 0.9;

const ATTACK_WINDOW: usize = 10;
const KEY_PLAYER_COUNT: usize = 5;
const H2H_WINDOW: usize = 10;
const H2H_NEUTRAL: f64 = 50.0;

/// One collection request: a team inside a (competition, season), with the
/// deadline the orchestrator propagated.
#[derive(Debug, Clone)]
pub struct CollectorRequest {
    pub team: TeamKey,
    pub league: LeagueKey,
    pub deadline: Instant,
}

/// A parameter collector. Produces one raw value per request, or a typed
/// unavailable result. Never writes normalized values; idempotent per
/// (team, competition, season, parameter) up to the provider's refresh.
pub trait Collector: Send + Sync {
    fn parameter(&self) -> Parameter;
    /// Pool key: requests for the same provider share one bounded pool.
    fn provider(&self) -> &str;
    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError>;
}

fn validate(parameter: Parameter, value: f64) -> Result<f64, ProviderError> {
    if !value.is_finite() {
        return Err(ProviderError::Invalid(format!(
            "{parameter}: non-finite value"
        )));
    }
    let (min, max) = parameter.admissible_range();
    if value < min || value > max {
        return Err(ProviderError::Invalid(format!(
            "{parameter}: {value} outside [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn as_stored(fixture: &FixtureRecord, league: &LeagueKey) -> Option<StoredMatch> {
    let home_id = fixture.home.api_id? as i64;
    let away_id = fixture.away.api_id? as i64;
    Some(StoredMatch {
        match_id: fixture.fixture_id,
        competition_id: 0,
        season: league.season.clone(),
        utc_time: fixture.utc_time.clone(),
        home_team_id: home_id,
        away_team_id: away_id,
        home_goals: fixture.home_goals,
        away_goals: fixture.away_goals,
        finished: fixture.finished,
    })
}

fn finished_matches(
    fixtures: &dyn FixtureSource,
    req: &CollectorRequest,
) -> Result<Vec<StoredMatch>, ProviderError> {
    let raw = fixtures.league_fixtures(&req.league, req.deadline)?;
    Ok(raw
        .iter()
        .filter(|f| f.finished)
        .filter_map(|f| as_stored(f, &req.league))
        .collect())
}

fn team_api_id(req: &CollectorRequest) -> Result<i64, ProviderError> {
    req.team
        .api_id
        .map(|id| id as i64)
        .ok_or_else(|| ProviderError::Permanent(format!("no provider id for {}", req.team.name)))
}

/// Most recent finished matches of one team, newest first.
fn recent_for_team(matches: &[StoredMatch], team_id: i64, limit: usize) -> Vec<&StoredMatch> {
    let mut own: Vec<&StoredMatch> = matches
        .iter()
        .filter(|m| m.home_team_id == team_id || m.away_team_id == team_id)
        .collect();
    own.sort_by(|a, b| b.utc_time.cmp(&a.utc_time).then(b.match_id.cmp(&a.match_id)));
    own.truncate(limit);
    own
}

// ---- elo ----

pub struct EloCollector {
    provider: String,
    source: Arc<dyn RatingSource>,
}

impl EloCollector {
    pub fn new(provider: impl Into<String>, source: Arc<dyn RatingSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

impl Collector for EloCollector {
    fn parameter(&self) -> Parameter {
        Parameter::Elo
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let rating = self.source.team_rating(&req.team, &req.league, req.deadline)?;
        validate(Parameter::Elo, rating)
    }
}

// ---- squad value ----

pub struct SquadValueCollector {
    provider: String,
    source: Arc<dyn SquadSource>,
}

impl SquadValueCollector {
    pub fn new(provider: impl Into<String>, source: Arc<dyn SquadSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

impl Collector for SquadValueCollector {
    fn parameter(&self) -> Parameter {
        Parameter::SquadValue
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let squad = self.source.squad(&req.team, req.deadline)?;
        let total = squad.total_value();
        if total == 0.0 {
            return Err(ProviderError::Permanent(format!(
                "no market values for {}",
                req.team.name
            )));
        }
        validate(Parameter::SquadValue, total)
    }
}

// ---- form ----

pub struct FormCollector {
    provider: String,
    fixtures: Arc<dyn FixtureSource>,
    /// Scale each result by the opponent's elo relative to the field.
    opponent_adjusted: bool,
}

impl FormCollector {
    pub fn new(provider: impl Into<String>, fixtures: Arc<dyn FixtureSource>) -> Self {
        Self {
            provider: provider.into(),
            fixtures,
            opponent_adjusted: true,
        }
    }
}

impl Collector for FormCollector {
    fn parameter(&self) -> Parameter {
        Parameter::Form
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let team_id = team_api_id(req)?;
        let matches = finished_matches(self.fixtures.as_ref(), req)?;
        let recent = recent_for_team(&matches, team_id, FORM_MATCHES);
        if recent.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "no finished matches for {}",
                req.team.name
            )));
        }

        let elo = self
            .opponent_adjusted
            .then(|| ratings::replay_elo(&matches, EloConfig::default()));

        let mut total = 0.0;
        for (age, m) in recent.iter().enumerate() {
            let Some(outcome) = m.outcome_for(team_id) else {
                continue;
            };
            let recency = FORM_DECAY.powi(age as i32);
            let opponent = match (&elo, m.opponent_of(team_id)) {
                (Some(elo), Some(opp)) => ratings::opponent_factor(elo, opp),
                _ => 1.0,
            };
            total += outcome.points() * recency * opponent;
        }
        validate(Parameter::Form, total)
    }
}

// ---- squad depth ----

pub struct SquadDepthCollector {
    provider: String,
    source: Arc<dyn SquadSource>,
}

impl SquadDepthCollector {
    pub fn new(provider: impl Into<String>, source: Arc<dyn SquadSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

impl Collector for SquadDepthCollector {
    fn parameter(&self) -> Parameter {
        Parameter::SquadDepth
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let squad = self.source.squad(&req.team, req.deadline)?;
        if squad.size() == 0 {
            return Err(ProviderError::Permanent(format!(
                "empty squad for {}",
                req.team.name
            )));
        }
        // Size alone says little: a thin squad of expensive players covers
        // injuries better than a long bench of fringe players, so the value
        // factor keeps equal-sized squads apart.
        let size_score = (squad.size() as f64 / 25.0).clamp(0.2, 1.6);
        let quality = 1.0 + squad.total_value().max(0.0).ln_1p() / 4.0;
        validate(Parameter::SquadDepth, size_score * quality)
    }
}

// ---- key player availability ----

pub struct KeyPlayerAvailabilityCollector {
    provider: String,
    source: Arc<dyn SquadSource>,
}

impl KeyPlayerAvailabilityCollector {
    pub fn new(provider: impl Into<String>, source: Arc<dyn SquadSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

impl Collector for KeyPlayerAvailabilityCollector {
    fn parameter(&self) -> Parameter {
        Parameter::KeyPlayerAvailability
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let squad = self.source.squad(&req.team, req.deadline)?;
        if squad.size() == 0 {
            return Err(ProviderError::Permanent(format!(
                "empty squad for {}",
                req.team.name
            )));
        }

        let mut valued: Vec<_> = squad
            .players
            .iter()
            .filter(|p| p.market_value.is_some())
            .collect();
        if valued.is_empty() {
            // No valuations at all: plain fraction of the squad that is fit.
            let fit = squad.players.iter().filter(|p| p.fit).count();
            return validate(
                Parameter::KeyPlayerAvailability,
                fit as f64 / squad.size() as f64,
            );
        }

        valued.sort_by(|a, b| {
            b.market_value
                .unwrap_or(0.0)
                .total_cmp(&a.market_value.unwrap_or(0.0))
        });
        valued.truncate(KEY_PLAYER_COUNT);

        let total: f64 = valued.iter().filter_map(|p| p.market_value).sum();
        if total <= 0.0 {
            return Err(ProviderError::Permanent(format!(
                "no positive market values for {}",
                req.team.name
            )));
        }
        let available: f64 = valued
            .iter()
            .filter(|p| p.fit)
            .filter_map(|p| p.market_value)
            .sum();
        validate(Parameter::KeyPlayerAvailability, available / total)
    }
}

// ---- motivation ----

pub struct MotivationCollector {
    provider: String,
    source: Arc<dyn StandingsSource>,
}

impl MotivationCollector {
    pub fn new(provider: impl Into<String>, source: Arc<dyn StandingsSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

/// Position-percentile mapping: title contention and the relegation battle
/// both push motivation up; safe mid-table sits at the baseline.
pub fn motivation_from_position(position: u32, total_teams: u32) -> f64 {
    if total_teams == 0 || position == 0 {
        return 0.5;
    }
    let ratio = position as f64 / total_teams as f64;
    if ratio <= 0.25 {
        let proximity = (0.25 - ratio) / 0.25;
        0.85 + proximity * 0.15
    } else if ratio <= 0.35 {
        let factor = (0.35 - ratio) / 0.10;
        0.70 + factor * 0.10
    } else if ratio >= 0.85 {
        let proximity = (ratio - 0.85) / 0.15;
        0.90 + proximity * 0.10
    } else {
        // Gentle slope so mid-table positions still order deterministically.
        let slack = (0.85 - ratio) / 0.50;
        0.30 + slack * 0.10
    }
}

impl Collector for MotivationCollector {
    fn parameter(&self) -> Parameter {
        Parameter::Motivation
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let standings = self.source.standings(&req.league, req.deadline)?;
        let total = standings.len() as u32;
        let row = standings
            .iter()
            .find(|row| {
                row.team.api_id == req.team.api_id && row.team.api_id.is_some()
                    || row.team.name == req.team.name
            })
            .ok_or_else(|| {
                ProviderError::Permanent(format!("{} not in standings", req.team.name))
            })?;
        validate(
            Parameter::Motivation,
            motivation_from_position(row.position, total).clamp(0.0, 1.0),
        )
    }
}

// ---- tactical style profile ----

pub struct TacticalProfileCollector {
    provider: String,
    source: Arc<dyn StatsSource>,
}

impl TacticalProfileCollector {
    pub fn new(provider: impl Into<String>, source: Arc<dyn StatsSource>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

impl Collector for TacticalProfileCollector {
    fn parameter(&self) -> Parameter {
        Parameter::TacticalMatchup
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    /// Matchups are pairwise; storage is per-team. This collapses a team's
    /// season statistics into one style score; the odds engine combines the
    /// two sides' profiles at query time.
    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let stats = self.source.team_statistics(&req.team, &req.league, req.deadline)?;
        if stats.matches_played == 0 {
            return Err(ProviderError::Permanent(format!(
                "no season statistics for {}",
                req.team.name
            )));
        }
        let played = stats.matches_played as f64;

        let attack = ((stats.goals_for as f64 / played) / 3.0).clamp(0.0, 1.0);
        let solidity = (stats.clean_sheets as f64 / played).clamp(0.0, 1.0);
        let control = stats
            .possession_pct
            .map(|p| (p / 100.0).clamp(0.0, 1.0))
            .unwrap_or(0.5);
        let threat = stats
            .shots_per_match
            .map(|s| (s / 20.0).clamp(0.0, 1.0))
            .unwrap_or(attack);

        let style = 0.35 * attack + 0.25 * solidity + 0.25 * control + 0.15 * threat;
        validate(Parameter::TacticalMatchup, style.clamp(0.0, 1.0))
    }
}

// ---- offensive / defensive ratings ----

pub struct OffensiveRatingCollector {
    provider: String,
    fixtures: Arc<dyn FixtureSource>,
}

impl OffensiveRatingCollector {
    pub fn new(provider: impl Into<String>, fixtures: Arc<dyn FixtureSource>) -> Self {
        Self {
            provider: provider.into(),
            fixtures,
        }
    }
}

impl Collector for OffensiveRatingCollector {
    fn parameter(&self) -> Parameter {
        Parameter::OffensiveRating
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let team_id = team_api_id(req)?;
        let matches = finished_matches(self.fixtures.as_ref(), req)?;
        let recent = recent_for_team(&matches, team_id, ATTACK_WINDOW);
        if recent.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "no finished matches for {}",
                req.team.name
            )));
        }
        let elo = ratings::replay_elo(&matches, EloConfig::default());

        let mut adjusted_goals = 0.0;
        let mut counted = 0usize;
        for m in recent {
            let Some((scored, _)) = m.goals_for(team_id) else {
                continue;
            };
            let factor = m
                .opponent_of(team_id)
                .map(|opp| ratings::opponent_factor(&elo, opp))
                .unwrap_or(1.0);
            // Goals against strong opposition count for more.
            adjusted_goals += scored as f64 * factor;
            counted += 1;
        }
        if counted == 0 {
            return Err(ProviderError::Permanent(format!(
                "no scored matches for {}",
                req.team.name
            )));
        }
        validate(Parameter::OffensiveRating, adjusted_goals / counted as f64)
    }
}

pub struct DefensiveRatingCollector {
    provider: String,
    fixtures: Arc<dyn FixtureSource>,
}

impl DefensiveRatingCollector {
    pub fn new(provider: impl Into<String>, fixtures: Arc<dyn FixtureSource>) -> Self {
        Self {
            provider: provider.into(),
            fixtures,
        }
    }
}

impl Collector for DefensiveRatingCollector {
    fn parameter(&self) -> Parameter {
        Parameter::DefensiveRating
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let team_id = team_api_id(req)?;
        let matches = finished_matches(self.fixtures.as_ref(), req)?;
        let recent = recent_for_team(&matches, team_id, ATTACK_WINDOW);
        if recent.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "no finished matches for {}",
                req.team.name
            )));
        }
        let elo = ratings::replay_elo(&matches, EloConfig::default());

        let mut adjusted_conceded = 0.0;
        let mut counted = 0usize;
        for m in recent {
            let Some((_, conceded)) = m.goals_for(team_id) else {
                continue;
            };
            let factor = m
                .opponent_of(team_id)
                .map(|opp| ratings::opponent_factor(&elo, opp))
                .unwrap_or(1.0);
            // Conceding to weak opposition weighs heavier.
            adjusted_conceded += conceded as f64 / factor;
            counted += 1;
        }
        if counted == 0 {
            return Err(ProviderError::Permanent(format!(
                "no scored matches for {}",
                req.team.name
            )));
        }
        let per_match = adjusted_conceded / counted as f64;
        validate(Parameter::DefensiveRating, 1.0 / (1.0 + per_match))
    }
}

// ---- head-to-head ----

pub struct H2hCollector {
    provider: String,
    fixtures: Arc<dyn FixtureSource>,
}

impl H2hCollector {
    pub fn new(provider: impl Into<String>, fixtures: Arc<dyn FixtureSource>) -> Self {
        Self {
            provider: provider.into(),
            fixtures,
        }
    }
}

/// Score one team's record against one opponent over a bounded window of
/// meetings, on a 0-100 scale; 50 is neutral.
pub fn h2h_score(meetings: &[&StoredMatch], team_id: i64) -> f64 {
    if meetings.is_empty() {
        return H2H_NEUTRAL;
    }
    let mut points = 0.0;
    let mut goal_diff = 0i32;
    let mut played = 0usize;
    for m in meetings.iter().take(H2H_WINDOW) {
        let Some(outcome) = m.outcome_for(team_id) else {
            continue;
        };
        points += outcome.points();
        if let Some((scored, conceded)) = m.goals_for(team_id) {
            goal_diff += scored - conceded;
        }
        played += 1;
    }
    if played == 0 {
        return H2H_NEUTRAL;
    }
    let points_ratio = points / (3.0 * played as f64);
    let base = points_ratio * 70.0;
    let goal_bonus = ((goal_diff as f64 / played as f64) * 5.0).clamp(-15.0, 15.0);
    let recent_bonus = meetings
        .first()
        .and_then(|m| m.outcome_for(team_id))
        .map(|outcome| match outcome {
            MatchOutcome::Win => 15.0,
            MatchOutcome::Draw => 7.5,
            MatchOutcome::Loss => 0.0,
        })
        .unwrap_or(0.0);
    (base + goal_bonus + recent_bonus).clamp(0.0, 100.0)
}

impl Collector for H2hCollector {
    fn parameter(&self) -> Parameter {
        Parameter::H2hPerformance
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    /// Stored per-team baseline: the team's average h2h score over all
    /// competition peers it has actually met. Pairwise refinement between
    /// two specific teams happens in the odds engine.
    fn collect(&self, req: &CollectorRequest) -> Result<f64, ProviderError> {
        let team_id = team_api_id(req)?;
        let matches = finished_matches(self.fixtures.as_ref(), req)?;

        let mut opponents: Vec<i64> = matches
            .iter()
            .filter_map(|m| m.opponent_of(team_id))
            .collect();
        opponents.sort_unstable();
        opponents.dedup();
        if opponents.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "no meetings on record for {}",
                req.team.name
            )));
        }

        let mut total = 0.0;
        for opponent in &opponents {
            let mut meetings: Vec<&StoredMatch> = matches
                .iter()
                .filter(|m| {
                    m.opponent_of(team_id) == Some(*opponent)
                        && (m.home_team_id == team_id || m.away_team_id == team_id)
                })
                .collect();
            meetings.sort_by(|a, b| b.utc_time.cmp(&a.utc_time));
            total += h2h_score(&meetings, team_id);
        }
        validate(Parameter::H2hPerformance, total / opponents.len() as f64)
    }
}

/// Named handle so collectors sharing a provider land in the same pool.
pub struct SourceHandle<T: ?Sized> {
    pub provider: String,
    pub source: Arc<T>,
}

impl<T: ?Sized> SourceHandle<T> {
    pub fn new(provider: impl Into<String>, source: Arc<T>) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

pub struct Sources {
    pub ratings: SourceHandle<dyn RatingSource>,
    pub fixtures: SourceHandle<dyn FixtureSource>,
    pub standings: SourceHandle<dyn StandingsSource>,
    pub squads: SourceHandle<dyn SquadSource>,
    pub stats: SourceHandle<dyn StatsSource>,
}

/// The full collector set of the scoring blueprint, one per parameter.
pub fn standard_collectors(sources: &Sources) -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(EloCollector::new(
            sources.ratings.provider.clone(),
            sources.ratings.source.clone(),
        )),
        Arc::new(SquadValueCollector::new(
            sources.squads.provider.clone(),
            sources.squads.source.clone(),
        )),
        Arc::new(FormCollector::new(
            sources.fixtures.provider.clone(),
            sources.fixtures.source.clone(),
        )),
        Arc::new(SquadDepthCollector::new(
            sources.squads.provider.clone(),
            sources.squads.source.clone(),
        )),
        Arc::new(KeyPlayerAvailabilityCollector::new(
            sources.squads.provider.clone(),
            sources.squads.source.clone(),
        )),
        Arc::new(MotivationCollector::new(
            sources.standings.provider.clone(),
            sources.standings.source.clone(),
        )),
        Arc::new(TacticalProfileCollector::new(
            sources.stats.provider.clone(),
            sources.stats.source.clone(),
        )),
        Arc::new(OffensiveRatingCollector::new(
            sources.fixtures.provider.clone(),
            sources.fixtures.source.clone(),
        )),
        Arc::new(DefensiveRatingCollector::new(
            sources.fixtures.provider.clone(),
            sources.fixtures.source.clone(),
        )),
        Arc::new(H2hCollector::new(
            sources.fixtures.provider.clone(),
            sources.fixtures.source.clone(),
        )),
    ]
}
