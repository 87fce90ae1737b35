use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::aggregator::aggregate;
use crate::config::CoveragePolicy;
use crate::model::CompetitionKind;
use crate::normalizer::{normalize, rescale_strengths};
use crate::params::{ParamMap, Parameter, Weights};
use crate::store::Store;

/// Per-competition derived-value pass: normalize every parameter over the
/// competition's snapshot of raw values, then fold each record under the
/// weight vector. Collectors never touch these columns.
pub fn recompute_competition(
    store: &Store,
    competition_id: i64,
    weights: &Weights,
    policy: CoveragePolicy,
) -> Result<()> {
    for param in Parameter::ALL {
        let raw = store.raw_values_for(competition_id, param)?;
        let normalized = normalize(&raw, param.direction());
        store.write_normalized(param, &normalized)?;
    }

    let records = store.records_for_competition(competition_id)?;
    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let outcome = aggregate(&record.normalized, weights, policy);
        rows.push((record.id, outcome.overall_strength, Some(outcome.confidence)));
    }
    store.write_overall_strengths(&rows)?;
    debug!(competition_id, teams = rows.len(), "recomputed overall strengths");
    Ok(())
}

/// Local-league strength: the competition's overall strengths rescaled
/// linearly so the top team sits at 1.0 and the bottom at 0.0.
pub fn recompute_local_league(store: &Store, competition_id: i64) -> Result<()> {
    let records = store.records_for_competition(competition_id)?;
    let values: Vec<(i64, Option<f64>)> = records
        .iter()
        .map(|r| (r.id, r.overall_strength))
        .collect();
    store.write_local_strengths(&rescale_strengths(&values))?;
    Ok(())
}

/// European strength: every parameter re-normalized over the union of all
/// domestic-league competitions in the season, then aggregated. The
/// cross-competition normalized values are transient; only the aggregate is
/// persisted.
pub fn recompute_european(
    store: &Store,
    season: &str,
    weights: &Weights,
    policy: CoveragePolicy,
) -> Result<()> {
    let competitions: Vec<i64> = store
        .list_competitions(Some(season))?
        .into_iter()
        .filter(|c| c.kind == CompetitionKind::DomesticLeague)
        .map(|c| c.id)
        .collect();
    if competitions.is_empty() {
        return Ok(());
    }

    let mut cross_normalized: HashMap<i64, ParamMap> = HashMap::new();
    for param in Parameter::ALL {
        let mut union: Vec<(i64, Option<f64>)> = Vec::new();
        for competition_id in &competitions {
            union.extend(store.raw_values_for(*competition_id, param)?);
        }
        for (record_id, value) in normalize(&union, param.direction()) {
            cross_normalized
                .entry(record_id)
                .or_default()
                .set(param, value);
        }
    }

    let mut rows = Vec::with_capacity(cross_normalized.len());
    for (record_id, normalized) in &cross_normalized {
        let outcome = aggregate(normalized, weights, policy);
        rows.push((*record_id, outcome.overall_strength));
    }
    rows.sort_by_key(|(id, _)| *id);
    store.write_european_strengths(&rows)?;
    debug!(season, teams = rows.len(), "recomputed european strengths");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompetitionKind;
    use crate::store::Store;

    fn seeded_store() -> (Store, i64, Vec<i64>) {
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
        let mut records = Vec::new();
        for (name, elo) in [
            ("Arsenal", 1600.0),
            ("Chelsea", 1500.0),
            ("Everton", 1400.0),
        ] {
            let team = store.upsert_team(name, None, None).unwrap();
            let record = store.ensure_record(team, comp, "2024").unwrap();
            store.upsert_raw_value(record, Parameter::Elo, elo).unwrap();
            records.push(record);
        }
        (store, comp, records)
    }

    #[test]
    fn competition_pass_normalizes_and_aggregates() {
        let (store, comp, records) = seeded_store();
        recompute_competition(
            &store,
            comp,
            &Weights::standard(),
            CoveragePolicy::SkipAndRenormalize,
        )
        .unwrap();

        let top = store.get_record(records[0]).unwrap().unwrap();
        let mid = store.get_record(records[1]).unwrap().unwrap();
        let bottom = store.get_record(records[2]).unwrap().unwrap();
        assert_eq!(top.normalized.get(Parameter::Elo), Some(1.0));
        assert_eq!(mid.normalized.get(Parameter::Elo), Some(0.5));
        assert_eq!(bottom.normalized.get(Parameter::Elo), Some(0.0));

        // Only elo present: skip-and-renormalize folds it alone.
        assert_eq!(top.overall_strength, Some(1.0));
        assert_eq!(bottom.overall_strength, Some(0.0));
        let expected_conf = Parameter::Elo.default_weight();
        assert!((top.confidence.unwrap() - expected_conf).abs() < 1e-9);
    }

    #[test]
    fn local_league_tops_out_at_one() {
        let (store, comp, records) = seeded_store();
        recompute_competition(
            &store,
            comp,
            &Weights::standard(),
            CoveragePolicy::SkipAndRenormalize,
        )
        .unwrap();
        recompute_local_league(&store, comp).unwrap();

        let top = store.get_record(records[0]).unwrap().unwrap();
        let bottom = store.get_record(records[2]).unwrap().unwrap();
        assert_eq!(top.local_league_strength, Some(1.0));
        assert_eq!(bottom.local_league_strength, Some(0.0));
    }

    #[test]
    fn european_pass_spans_competitions() {
        let (store, comp_a, _) = seeded_store();
        let comp_b = store
            .upsert_competition(
                "La Liga",
                "Spain",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                None,
            )
            .unwrap();
        let real = store.upsert_team("Real Madrid", None, None).unwrap();
        let record = store.ensure_record(real, comp_b, "2024").unwrap();
        store
            .upsert_raw_value(record, Parameter::Elo, 1900.0)
            .unwrap();

        let weights = Weights::standard();
        for comp in [comp_a, comp_b] {
            recompute_competition(&store, comp, &weights, CoveragePolicy::SkipAndRenormalize)
                .unwrap();
        }
        recompute_european(&store, "2024", &weights, CoveragePolicy::SkipAndRenormalize).unwrap();

        // Within La Liga, Real Madrid is alone (degenerate 0.5 locally), but
        // across the union it holds the best elo and tops the scale.
        let real_record = store.get_record(record).unwrap().unwrap();
        assert_eq!(real_record.european_strength, Some(1.0));
    }
}
