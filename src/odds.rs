use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CoveragePolicy, OddsConfig};
use crate::model::TeamRecord;
use crate::params::Parameter;

/// Bounded tilt applied to the win split from the two sides' stored
/// head-to-head signals. The per-team value is the baseline; this is the
/// pairwise refinement applied at quote time.
const H2H_TILT: f64 = 0.05;

#[derive(Debug, Clone, Error)]
pub enum OddsError {
    #[error("insufficient coverage for {team}: missing {missing:?}")]
    InsufficientCoverage {
        team: String,
        missing: Vec<Parameter>,
    },
}

/// Which strength variant fed the quote, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrengthVariant {
    LocalLeague,
    European,
}

impl StrengthVariant {
    pub fn rationale(self) -> &'static str {
        match self {
            StrengthVariant::LocalLeague => "same-competition",
            StrengthVariant::European => "cross-competition",
        }
    }
}

/// One outcome: raw probability plus decimal odds carrying the bookmaker
/// margin. Odds stay unrounded until the presentation boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketLine {
    pub probability: f64,
    pub decimal_odds: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OneXTwoMarket {
    pub home: MarketLine,
    pub draw: MarketLine,
    pub away: MarketLine,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GoalsMarket {
    pub over: MarketLine,
    pub under: MarketLine,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BttsMarket {
    pub yes: MarketLine,
    pub no: MarketLine,
}

/// The full quote for one pairing.
#[derive(Debug, Clone, Serialize)]
pub struct OddsSheet {
    pub home_team: String,
    pub away_team: String,
    pub variant: StrengthVariant,
    pub rationale: &'static str,
    pub neutral_venue: bool,
    pub one_x_two: OneXTwoMarket,
    pub goals: GoalsMarket,
    pub btts: BttsMarket,
    pub expected_goals: f64,
    pub likely_score: String,
    /// Lowest coverage confidence of the two sides.
    pub confidence: f64,
}

/// Converts two team records plus venue context into market probabilities
/// and decimal odds. Pure given its frozen configuration.
pub struct OddsEngine {
    cfg: OddsConfig,
    policy: CoveragePolicy,
}

impl OddsEngine {
    pub fn new(cfg: OddsConfig, policy: CoveragePolicy) -> Self {
        Self { cfg, policy }
    }

    pub fn quote(
        &self,
        home: &TeamRecord,
        away: &TeamRecord,
        neutral_venue: bool,
    ) -> Result<OddsSheet, OddsError> {
        let variant = select_variant(home, away);
        let s_home = self.strength_of(home, variant)?;
        let s_away = self.strength_of(away, variant)?;

        let one_x_two = self.one_x_two(s_home, s_away, home, away, neutral_venue);

        let attack_home = effective_attack(home, away, s_home);
        let attack_away = effective_attack(away, home, s_away);
        let combined = (attack_home + attack_away) / 2.0;
        let expected_goals = 1.95 + 1.3 * combined;

        let p_over = (0.35 + 0.40 * combined).clamp(0.35, 0.75);
        let goals = GoalsMarket {
            over: self.line(p_over),
            under: self.line(1.0 - p_over),
        };

        let p_yes = (0.35 + 0.45 * attack_home.min(attack_away)).clamp(0.35, 0.80);
        let btts = BttsMarket {
            yes: self.line(p_yes),
            no: self.line(1.0 - p_yes),
        };

        let likely_score = most_likely_score(
            one_x_two.home.probability,
            one_x_two.draw.probability,
            one_x_two.away.probability,
            expected_goals,
        );

        let confidence = home
            .confidence
            .unwrap_or(1.0)
            .min(away.confidence.unwrap_or(1.0));

        Ok(OddsSheet {
            home_team: home.team_name.clone(),
            away_team: away.team_name.clone(),
            variant,
            rationale: variant.rationale(),
            neutral_venue,
            one_x_two,
            goals,
            btts,
            expected_goals,
            likely_score,
            confidence,
        })
    }

    fn strength_of(&self, record: &TeamRecord, variant: StrengthVariant) -> Result<f64, OddsError> {
        let primary = match variant {
            StrengthVariant::LocalLeague => record.local_league_strength,
            StrengthVariant::European => record.european_strength,
        };
        let value = match self.policy {
            CoveragePolicy::StrictNull => {
                // Under strict mode a partial record never quotes.
                if !record.normalized.missing().is_empty() {
                    return Err(OddsError::InsufficientCoverage {
                        team: record.team_name.clone(),
                        missing: record.normalized.missing(),
                    });
                }
                primary
            }
            CoveragePolicy::SkipAndRenormalize => primary.or(record.overall_strength),
        };
        value.ok_or_else(|| OddsError::InsufficientCoverage {
            team: record.team_name.clone(),
            missing: record.normalized.missing(),
        })
    }

    fn one_x_two(
        &self,
        s_home: f64,
        s_away: f64,
        home: &TeamRecord,
        away: &TeamRecord,
        neutral_venue: bool,
    ) -> OneXTwoMarket {
        let total = s_home + s_away;
        let (mut p_home0, mut p_away0) = if total > 0.0 {
            (s_home / total, s_away / total)
        } else {
            (0.5, 0.5)
        };

        // Pairwise head-to-head tilt on top of the stored per-team baseline.
        if let (Some(h2h_home), Some(h2h_away)) = (
            home.normalized.get(Parameter::H2hPerformance),
            away.normalized.get(Parameter::H2hPerformance),
        ) {
            let tilt = 1.0 + H2H_TILT * (h2h_home - h2h_away);
            p_home0 *= tilt;
            p_away0 *= 2.0 - tilt;
            let sum = p_home0 + p_away0;
            p_home0 /= sum;
            p_away0 /= sum;
        }

        if !neutral_venue {
            let alpha = self.cfg.home_boost_alpha;
            p_home0 *= 1.0 + alpha;
            p_away0 *= 1.0 - alpha;
            let sum = p_home0 + p_away0;
            p_home0 /= sum;
            p_away0 /= sum;
        }

        let gap_norm = ((s_home - s_away).abs() * self.cfg.draw_k).min(1.0);
        let p_draw = (self.cfg.draw_ceiling - self.cfg.draw_beta * gap_norm)
            .clamp(self.cfg.draw_floor, self.cfg.draw_ceiling);

        let p_home = (1.0 - p_draw) * p_home0;
        let p_away = (1.0 - p_draw) * p_away0;

        OneXTwoMarket {
            home: self.line(p_home),
            draw: self.line(p_draw),
            away: self.line(p_away),
        }
    }

    fn line(&self, probability: f64) -> MarketLine {
        MarketLine {
            probability,
            decimal_odds: (1.0 + self.cfg.margin) / probability,
        }
    }
}

/// Same (competition, season) reads on the local-league scale; anything else
/// compares across leagues on the european scale.
pub fn select_variant(a: &TeamRecord, b: &TeamRecord) -> StrengthVariant {
    if a.competition_id == b.competition_id && a.season == b.season {
        StrengthVariant::LocalLeague
    } else {
        StrengthVariant::European
    }
}

/// A side's attacking quality: its normalized offensive rating discounted by
/// the opponent's normalized defensive rating, falling back to the selected
/// strength when the attack/defense parameters are not populated.
fn effective_attack(side: &TeamRecord, opponent: &TeamRecord, fallback: f64) -> f64 {
    match (
        side.normalized.get(Parameter::OffensiveRating),
        opponent.normalized.get(Parameter::DefensiveRating),
    ) {
        (Some(attack), Some(defense)) => (0.5 + (attack - defense) / 2.0).clamp(0.0, 1.0),
        _ => fallback.clamp(0.0, 1.0),
    }
}

/// Deterministic scoreline from the dominant outcome and expected goals,
/// rounded to the nearest half goal.
pub fn most_likely_score(p_home: f64, p_draw: f64, p_away: f64, expected_goals: f64) -> String {
    let e_half = (expected_goals * 2.0).round() / 2.0;
    let high_scoring = e_half >= 3.0;

    if p_home > p_away && p_home > p_draw {
        match (p_home > 0.60, high_scoring) {
            (true, true) => "3-1",
            (true, false) => "2-0",
            (false, true) => "2-1",
            (false, false) => "1-0",
        }
        .to_string()
    } else if p_away > p_home && p_away > p_draw {
        match (p_away > 0.60, high_scoring) {
            (true, true) => "1-3",
            (true, false) => "0-2",
            (false, true) => "1-2",
            (false, false) => "0-1",
        }
        .to_string()
    } else if e_half <= 2.0 {
        "0-0".to_string()
    } else if high_scoring {
        "2-2".to_string()
    } else {
        "1-1".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamMap;

    fn record(name: &str, competition_id: i64, local: f64) -> TeamRecord {
        TeamRecord {
            id: 1,
            team_id: 1,
            team_name: name.to_string(),
            competition_id,
            season: "2024".to_string(),
            raw: ParamMap::new(),
            normalized: ParamMap::new(),
            overall_strength: Some(local),
            local_league_strength: Some(local),
            european_strength: Some(local),
            confidence: Some(1.0),
            last_updated: None,
        }
    }

    fn engine(alpha: f64) -> OddsEngine {
        let cfg = OddsConfig {
            home_boost_alpha: alpha,
            ..OddsConfig::default()
        };
        OddsEngine::new(cfg, CoveragePolicy::SkipAndRenormalize)
    }

    #[test]
    fn evenly_matched_without_boost_is_symmetric() {
        let sheet = engine(0.0)
            .quote(
                &record("A", 1, 0.6),
                &record("B", 1, 0.6),
                false,
            )
            .unwrap();
        let m = &sheet.one_x_two;
        assert!((m.draw.probability - 0.33).abs() < 1e-12);
        assert!((m.home.probability - 0.335).abs() < 1e-12);
        assert!((m.away.probability - 0.335).abs() < 1e-12);
        // 1.05 / 0.335 and 1.05 / 0.33, rounded for display.
        assert!((m.home.decimal_odds - 3.1343).abs() < 1e-3);
        assert!((m.draw.decimal_odds - 3.1818).abs() < 1e-3);
    }

    #[test]
    fn moderate_gap_with_home_boost() {
        let sheet = engine(0.10)
            .quote(
                &record("A", 1, 0.7),
                &record("B", 1, 0.5),
                false,
            )
            .unwrap();
        let m = &sheet.one_x_two;
        // Gap 0.2 at k=2 gives normalized gap 0.4: draw 0.33 - 0.13*0.4.
        assert!((m.draw.probability - 0.278).abs() < 1e-9);
        assert!(m.home.probability > m.away.probability);
        let sum = m.home.probability + m.draw.probability + m.away.probability;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn probabilities_sum_to_one_per_market() {
        let sheet = engine(0.10)
            .quote(
                &record("A", 1, 0.83),
                &record("B", 1, 0.21),
                false,
            )
            .unwrap();
        let m = &sheet.one_x_two;
        let sum = m.home.probability + m.draw.probability + m.away.probability;
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(
            (sheet.goals.over.probability + sheet.goals.under.probability - 1.0).abs() < 1e-9
        );
        assert!((sheet.btts.yes.probability + sheet.btts.no.probability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn margin_relation_holds_on_every_line() {
        let sheet = engine(0.10)
            .quote(
                &record("A", 1, 0.9),
                &record("B", 1, 0.3),
                false,
            )
            .unwrap();
        for line in [
            sheet.one_x_two.home,
            sheet.one_x_two.draw,
            sheet.one_x_two.away,
            sheet.goals.over,
            sheet.goals.under,
            sheet.btts.yes,
            sheet.btts.no,
        ] {
            assert!((line.decimal_odds * line.probability - 1.05).abs() < 1e-9);
        }
    }

    #[test]
    fn home_probability_monotone_in_home_strength() {
        let e = engine(0.10);
        let away = record("B", 1, 0.5);
        let mut last_home = 0.0;
        let mut last_away = 1.0;
        for step in 0..=10 {
            let s = step as f64 / 10.0;
            let sheet = e.quote(&record("A", 1, s), &away, false).unwrap();
            assert!(sheet.one_x_two.home.probability >= last_home - 1e-12);
            assert!(sheet.one_x_two.away.probability <= last_away + 1e-12);
            last_home = sheet.one_x_two.home.probability;
            last_away = sheet.one_x_two.away.probability;
        }
    }

    #[test]
    fn draw_probability_stays_clamped() {
        let e = engine(0.10);
        for (a, b) in [(0.0, 1.0), (1.0, 0.0), (0.5, 0.5), (0.9, 0.1), (0.0, 0.0)] {
            let sheet = e.quote(&record("A", 1, a), &record("B", 1, b), false).unwrap();
            let draw = sheet.one_x_two.draw.probability;
            assert!((0.20..=0.33).contains(&draw), "draw {draw} out of bounds");
        }
    }

    #[test]
    fn zero_strengths_split_evenly() {
        let sheet = engine(0.0)
            .quote(&record("A", 1, 0.0), &record("B", 1, 0.0), true)
            .unwrap();
        let m = &sheet.one_x_two;
        assert!((m.home.probability - m.away.probability).abs() < 1e-12);
    }

    #[test]
    fn btts_floor_for_toothless_teams() {
        let sheet = engine(0.10)
            .quote(&record("A", 1, 0.0), &record("B", 1, 0.0), false)
            .unwrap();
        assert!((sheet.btts.yes.probability - 0.35).abs() < 1e-9);
        assert!((sheet.btts.no.probability - 0.65).abs() < 1e-9);
        assert!((sheet.goals.over.probability - 0.35).abs() < 1e-9);
    }

    #[test]
    fn over_probability_rises_with_attacking_quality() {
        let e = engine(0.0);
        let weak = e
            .quote(&record("A", 1, 0.2), &record("B", 1, 0.2), true)
            .unwrap();
        let strong = e
            .quote(&record("A", 1, 0.9), &record("B", 1, 0.9), true)
            .unwrap();
        assert!(strong.expected_goals > weak.expected_goals);
        assert!(strong.goals.over.probability > weak.goals.over.probability);
        assert!((0.35..=0.75).contains(&strong.goals.over.probability));
    }

    #[test]
    fn cross_competition_pairs_use_european_scale() {
        let mut home = record("A", 1, 0.9);
        let mut away = record("B", 2, 0.9);
        home.european_strength = Some(0.8);
        away.european_strength = Some(0.4);
        let sheet = engine(0.0).quote(&home, &away, true).unwrap();
        assert_eq!(sheet.variant, StrengthVariant::European);
        assert_eq!(sheet.rationale, "cross-competition");
        assert!(sheet.one_x_two.home.probability > sheet.one_x_two.away.probability);
    }

    #[test]
    fn strict_policy_refuses_partial_records() {
        let mut home = record("A", 1, 0.9);
        home.normalized.set(Parameter::Elo, Some(1.0));
        let away = record("B", 1, 0.5);
        let strict = OddsEngine::new(OddsConfig::default(), CoveragePolicy::StrictNull);
        let err = strict.quote(&home, &away, false).unwrap_err();
        match err {
            OddsError::InsufficientCoverage { team, missing } => {
                assert_eq!(team, "A");
                assert!(missing.contains(&Parameter::Form));
            }
        }
    }

    #[test]
    fn missing_strength_is_refused_with_missing_parameters() {
        let mut home = record("A", 1, 0.9);
        home.overall_strength = None;
        home.local_league_strength = None;
        home.european_strength = None;
        let err = engine(0.1)
            .quote(&home, &record("B", 1, 0.5), false)
            .unwrap_err();
        assert!(matches!(err, OddsError::InsufficientCoverage { .. }));
    }

    #[test]
    fn likely_score_tracks_dominance_and_goals() {
        assert_eq!(most_likely_score(0.7, 0.2, 0.1, 2.4), "2-0");
        assert_eq!(most_likely_score(0.5, 0.3, 0.2, 2.4), "1-0");
        assert_eq!(most_likely_score(0.1, 0.2, 0.7, 3.2), "1-3");
        assert_eq!(most_likely_score(0.3, 0.4, 0.3, 1.8), "0-0");
        assert_eq!(most_likely_score(0.3, 0.4, 0.3, 2.6), "1-1");
        assert_eq!(most_likely_score(0.3, 0.4, 0.3, 3.4), "2-2");
    }
}
