use std::collections::HashMap;

use crate::model::StoredMatch;

/// Elo replay over stored match history. Used by the offensive/defensive and
/// form collectors for opponent-strength adjustment; the headline elo
/// parameter itself comes from the rating provider.
#[derive(Debug, Clone, Copy)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
    pub base_rating: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 60.0,
            base_rating: 1500.0,
        }
    }
}

/// Replay all finished matches in kickoff order and return each team's final
/// rating. Input order does not matter; ties on kickoff break by fixture id.
pub fn replay_elo(matches: &[StoredMatch], cfg: EloConfig) -> HashMap<i64, f64> {
    let mut ordered: Vec<&StoredMatch> = matches
        .iter()
        .filter(|m| m.finished && m.home_goals.is_some() && m.away_goals.is_some())
        .collect();
    // ISO-ish timestamps make string ordering chronological.
    ordered.sort_by(|a, b| a.utc_time.cmp(&b.utc_time).then(a.match_id.cmp(&b.match_id)));

    let mut elo: HashMap<i64, f64> = HashMap::new();
    for m in ordered {
        let eh = *elo.entry(m.home_team_id).or_insert(cfg.base_rating);
        let ea = *elo.entry(m.away_team_id).or_insert(cfg.base_rating);

        let expected_home = expected_score(eh + cfg.home_adv_pts, ea);
        let (home_goals, away_goals) = (m.home_goals.unwrap_or(0), m.away_goals.unwrap_or(0));
        let s_home = if home_goals > away_goals {
            1.0
        } else if home_goals < away_goals {
            0.0
        } else {
            0.5
        };

        let delta = cfg.k * (s_home - expected_home);
        *elo.entry(m.home_team_id).or_insert(cfg.base_rating) = eh + delta;
        *elo.entry(m.away_team_id).or_insert(cfg.base_rating) = ea - delta;
    }

    elo
}

/// Opponent rating scaled against the field: 1.0 for an average opponent,
/// above for stronger, clamped to a sane band.
pub fn opponent_factor(elo: &HashMap<i64, f64>, opponent_id: i64) -> f64 {
    if elo.is_empty() {
        return 1.0;
    }
    let mean: f64 = elo.values().sum::<f64>() / elo.len() as f64;
    if mean <= 0.0 {
        return 1.0;
    }
    let rating = elo.get(&opponent_id).copied().unwrap_or(mean);
    (rating / mean).clamp(0.5, 1.5)
}

fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}
