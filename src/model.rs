use serde::{Deserialize, Serialize};

use crate::params::ParamMap;

/// A club or national side. Exists independently of any competition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub api_team_id: Option<u32>,
    pub confederation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompetitionKind {
    DomesticLeague,
    International,
}

impl CompetitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CompetitionKind::DomesticLeague => "domestic-league",
            CompetitionKind::International => "international",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "domestic-league" => Some(CompetitionKind::DomesticLeague),
            "international" => Some(CompetitionKind::International),
            _ => None,
        }
    }
}

/// A league or tournament scope within a season. (competition, season) is the
/// normalization scope; season is carried on the record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: i64,
    pub name: String,
    pub country: String,
    pub kind: CompetitionKind,
    pub season: String,
    pub tier: u8,
    pub api_league_id: Option<u32>,
}

/// The central record: one team inside one (competition, season). Raw values
/// are written by collectors; everything else is derived and recomputed from
/// raw values plus the weight vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: i64,
    pub team_id: i64,
    pub team_name: String,
    pub competition_id: i64,
    pub season: String,
    pub raw: ParamMap,
    pub normalized: ParamMap,
    pub overall_strength: Option<f64>,
    pub local_league_strength: Option<f64>,
    pub european_strength: Option<f64>,
    /// Fraction of active weight covered by present parameters; 1.0 when the
    /// record is complete.
    pub confidence: Option<f64>,
    pub last_updated: Option<String>,
}

impl TeamRecord {
    /// Presentation form of the canonical 0-1 strength.
    pub fn strength_percentage(&self) -> Option<f64> {
        self.overall_strength.map(|s| s * 100.0)
    }
}

/// A finished or scheduled fixture, keyed by the provider's fixture id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMatch {
    pub match_id: u64,
    pub competition_id: i64,
    pub season: String,
    pub utc_time: String,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
    pub finished: bool,
}

impl StoredMatch {
    pub fn outcome_for(&self, team_id: i64) -> Option<MatchOutcome> {
        let (Some(home_goals), Some(away_goals)) = (self.home_goals, self.away_goals) else {
            return None;
        };
        if !self.finished {
            return None;
        }
        let (scored, conceded) = if team_id == self.home_team_id {
            (home_goals, away_goals)
        } else if team_id == self.away_team_id {
            (away_goals, home_goals)
        } else {
            return None;
        };
        Some(if scored > conceded {
            MatchOutcome::Win
        } else if scored < conceded {
            MatchOutcome::Loss
        } else {
            MatchOutcome::Draw
        })
    }

    pub fn goals_for(&self, team_id: i64) -> Option<(i32, i32)> {
        let (Some(home_goals), Some(away_goals)) = (self.home_goals, self.away_goals) else {
            return None;
        };
        if team_id == self.home_team_id {
            Some((home_goals, away_goals))
        } else if team_id == self.away_team_id {
            Some((away_goals, home_goals))
        } else {
            None
        }
    }

    pub fn opponent_of(&self, team_id: i64) -> Option<i64> {
        if team_id == self.home_team_id {
            Some(self.away_team_id)
        } else if team_id == self.away_team_id {
            Some(self.home_team_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Win,
    Draw,
    Loss,
}

impl MatchOutcome {
    pub fn points(self) -> f64 {
        match self {
            MatchOutcome::Win => 3.0,
            MatchOutcome::Draw => 1.0,
            MatchOutcome::Loss => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(home_goals: i32, away_goals: i32) -> StoredMatch {
        StoredMatch {
            match_id: 9001,
            competition_id: 1,
            season: "2024".to_string(),
            utc_time: "2024-10-05T14:00:00Z".to_string(),
            home_team_id: 10,
            away_team_id: 20,
            home_goals: Some(home_goals),
            away_goals: Some(away_goals),
            finished: true,
        }
    }

    #[test]
    fn outcome_is_side_relative() {
        let m = fixture(2, 1);
        assert_eq!(m.outcome_for(10), Some(MatchOutcome::Win));
        assert_eq!(m.outcome_for(20), Some(MatchOutcome::Loss));
        assert_eq!(m.outcome_for(99), None);
    }

    #[test]
    fn unfinished_match_has_no_outcome() {
        let mut m = fixture(0, 0);
        m.finished = false;
        m.home_goals = None;
        m.away_goals = None;
        assert_eq!(m.outcome_for(10), None);
    }
}
