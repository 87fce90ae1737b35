use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CompetitionKind, TeamRecord};
use crate::odds::{OddsEngine, OddsError, OddsSheet};
use crate::params::Parameter;
use crate::store::{CompetitionCoverage, Store};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("team not found: {0}")]
    TeamNotFound(String),
    #[error("competition not found: {0}")]
    CompetitionNotFound(String),
    #[error(transparent)]
    Odds(#[from] OddsError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDirectoryEntry {
    pub team_id: i64,
    pub name: String,
    pub confederation: Option<String>,
    pub competitions: Vec<String>,
}

/// One team-in-competition strength view, percentages derived from the
/// canonical 0-1 values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthView {
    pub team: String,
    pub competition: String,
    pub season: String,
    pub overall_strength: Option<f64>,
    pub strength_percentage: Option<f64>,
    pub local_league_strength: Option<f64>,
    pub european_strength: Option<f64>,
    pub confidence: Option<f64>,
    pub normalized: Vec<(String, Option<f64>)>,
    pub last_updated: Option<String>,
}

/// Read-only surface over the store plus the odds engine. All operations are
/// side-effect free; concurrent callers each open their own `Queries`.
pub struct Queries<'a> {
    store: &'a Store,
    season: String,
}

impl<'a> Queries<'a> {
    pub fn new(store: &'a Store, season: impl Into<String>) -> Self {
        Self {
            store,
            season: season.into(),
        }
    }

    pub fn team_directory(
        &self,
        competition_name: Option<&str>,
    ) -> Result<Vec<TeamDirectoryEntry>, QueryError> {
        let competition_id = match competition_name {
            Some(name) => Some(
                self.store
                    .get_competition_by_name(name, &self.season)
                    .map_err(QueryError::Internal)?
                    .ok_or_else(|| QueryError::CompetitionNotFound(name.to_string()))?
                    .id,
            ),
            None => None,
        };
        let teams = self
            .store
            .list_teams(competition_id)
            .map_err(QueryError::Internal)?;
        let mut out = Vec::with_capacity(teams.len());
        for team in teams {
            let records = self
                .store
                .records_by_team_name(&team.name, &self.season)
                .map_err(QueryError::Internal)?;
            let mut competitions = Vec::with_capacity(records.len());
            for record in &records {
                if let Some(competition) = self
                    .store
                    .get_competition(record.competition_id)
                    .map_err(QueryError::Internal)?
                {
                    competitions.push(competition.name);
                }
            }
            out.push(TeamDirectoryEntry {
                team_id: team.id,
                name: team.name,
                confederation: team.confederation,
                competitions,
            });
        }
        Ok(out)
    }

    /// A team's strength records across competitions, optionally narrowed to
    /// one competition.
    pub fn strength(
        &self,
        team_name: &str,
        competition_name: Option<&str>,
    ) -> Result<Vec<StrengthView>, QueryError> {
        let records = self.resolve_records(team_name)?;
        let mut out = Vec::new();
        for record in records {
            let Some(competition) = self
                .store
                .get_competition(record.competition_id)
                .map_err(QueryError::Internal)?
            else {
                continue;
            };
            if let Some(filter) = competition_name
                && competition.name != filter
            {
                continue;
            }
            out.push(StrengthView {
                team: record.team_name.clone(),
                competition: competition.name,
                season: record.season.clone(),
                overall_strength: record.overall_strength,
                strength_percentage: record.strength_percentage(),
                local_league_strength: record.local_league_strength,
                european_strength: record.european_strength,
                confidence: record.confidence,
                normalized: Parameter::ALL
                    .into_iter()
                    .map(|p| (p.key().to_string(), record.normalized.get(p)))
                    .collect(),
                last_updated: record.last_updated.clone(),
            });
        }
        if out.is_empty() {
            return Err(QueryError::TeamNotFound(team_name.to_string()));
        }
        Ok(out)
    }

    /// Full odds payload for a pairing. Decimal odds round to two places
    /// here, at the response boundary.
    pub fn odds(
        &self,
        engine: &OddsEngine,
        home_name: &str,
        away_name: &str,
        neutral_venue: bool,
    ) -> Result<OddsSheet, QueryError> {
        let home_records = self.resolve_records(home_name)?;
        let away_records = self.resolve_records(away_name)?;
        let (home, away) = pick_pair(&home_records, &away_records);
        let mut sheet = engine.quote(home, away, neutral_venue)?;
        round_sheet(&mut sheet);
        Ok(sheet)
    }

    pub fn coverage(&self, competition_name: &str) -> Result<CompetitionCoverage, QueryError> {
        let competition = self
            .store
            .get_competition_by_name(competition_name, &self.season)
            .map_err(QueryError::Internal)?
            .ok_or_else(|| QueryError::CompetitionNotFound(competition_name.to_string()))?;
        self.store
            .coverage(competition.id)
            .map_err(QueryError::Internal)?
            .ok_or_else(|| QueryError::CompetitionNotFound(competition_name.to_string()))
    }

    /// Cross-league table ranked by european strength.
    pub fn cross_league_table(&self) -> Result<Vec<StrengthView>, QueryError> {
        let mut rows = Vec::new();
        for competition in self
            .store
            .list_competitions(Some(&self.season))
            .map_err(QueryError::Internal)?
        {
            if competition.kind != CompetitionKind::DomesticLeague {
                continue;
            }
            for record in self
                .store
                .records_for_competition(competition.id)
                .map_err(QueryError::Internal)?
            {
                if record.european_strength.is_none() {
                    continue;
                }
                rows.push(StrengthView {
                    team: record.team_name.clone(),
                    competition: competition.name.clone(),
                    season: record.season.clone(),
                    overall_strength: record.overall_strength,
                    strength_percentage: record.strength_percentage(),
                    local_league_strength: record.local_league_strength,
                    european_strength: record.european_strength,
                    confidence: record.confidence,
                    normalized: Vec::new(),
                    last_updated: record.last_updated.clone(),
                });
            }
        }
        rows.sort_by(|a, b| {
            b.european_strength
                .unwrap_or(0.0)
                .total_cmp(&a.european_strength.unwrap_or(0.0))
        });
        Ok(rows)
    }

    fn resolve_records(&self, team_name: &str) -> Result<Vec<TeamRecord>, QueryError> {
        let records = self
            .store
            .records_by_team_name(team_name, &self.season)
            .map_err(QueryError::Internal)?;
        if records.is_empty() {
            return Err(QueryError::TeamNotFound(team_name.to_string()));
        }
        Ok(records)
    }
}

/// Prefer the pair of records sharing one competition; otherwise fall back
/// to each side's first record (cross-competition quote).
fn pick_pair<'r>(
    home: &'r [TeamRecord],
    away: &'r [TeamRecord],
) -> (&'r TeamRecord, &'r TeamRecord) {
    for h in home {
        for a in away {
            if h.competition_id == a.competition_id {
                return (h, a);
            }
        }
    }
    (&home[0], &away[0])
}

fn round_sheet(sheet: &mut OddsSheet) {
    for line in [
        &mut sheet.one_x_two.home,
        &mut sheet.one_x_two.draw,
        &mut sheet.one_x_two.away,
        &mut sheet.goals.over,
        &mut sheet.goals.under,
        &mut sheet.btts.yes,
        &mut sheet.btts.no,
    ] {
        line.decimal_odds = (line.decimal_odds * 100.0).round() / 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoveragePolicy, OddsConfig};
    use crate::model::CompetitionKind;
    use crate::params::Weights;
    use crate::strength;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        let comp = store
            .upsert_competition(
                "Premier League",
                "England",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                None,
            )
            .unwrap();
        for (name, elo) in [("Arsenal", 1700.0), ("Chelsea", 1550.0), ("Luton", 1350.0)] {
            let team = store.upsert_team(name, None, Some("UEFA")).unwrap();
            let record = store.ensure_record(team, comp, "2024").unwrap();
            store.upsert_raw_value(record, Parameter::Elo, elo).unwrap();
        }
        strength::recompute_competition(
            &store,
            comp,
            &Weights::standard(),
            CoveragePolicy::SkipAndRenormalize,
        )
        .unwrap();
        strength::recompute_local_league(&store, comp).unwrap();
        strength::recompute_european(
            &store,
            "2024",
            &Weights::standard(),
            CoveragePolicy::SkipAndRenormalize,
        )
        .unwrap();
        store
    }

    #[test]
    fn directory_lists_league_membership() {
        let store = seeded();
        let queries = Queries::new(&store, "2024");
        let directory = queries.team_directory(None).unwrap();
        assert_eq!(directory.len(), 3);
        let arsenal = directory.iter().find(|t| t.name == "Arsenal").unwrap();
        assert_eq!(arsenal.competitions, vec!["Premier League".to_string()]);
    }

    #[test]
    fn unknown_team_is_a_typed_miss() {
        let store = seeded();
        let queries = Queries::new(&store, "2024");
        let err = queries.strength("Atlantis FC", None).unwrap_err();
        assert!(matches!(err, QueryError::TeamNotFound(_)));
    }

    #[test]
    fn odds_round_to_two_places_at_the_boundary() {
        let store = seeded();
        let queries = Queries::new(&store, "2024");
        let engine = OddsEngine::new(OddsConfig::default(), CoveragePolicy::SkipAndRenormalize);
        let sheet = queries.odds(&engine, "Arsenal", "Luton", false).unwrap();
        for line in [
            sheet.one_x_two.home,
            sheet.one_x_two.draw,
            sheet.one_x_two.away,
        ] {
            let scaled = line.decimal_odds * 100.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
        }
        assert_eq!(sheet.rationale, "same-competition");
        assert!(sheet.one_x_two.home.probability > sheet.one_x_two.away.probability);
    }

    #[test]
    fn strength_view_carries_percentage_form() {
        let store = seeded();
        let queries = Queries::new(&store, "2024");
        let views = queries.strength("Arsenal", None).unwrap();
        assert_eq!(views.len(), 1);
        let view = &views[0];
        let overall = view.overall_strength.unwrap();
        assert!((view.strength_percentage.unwrap() - overall * 100.0).abs() < 1e-12);
        assert_eq!(view.local_league_strength, Some(1.0));
    }
}
