use std::collections::HashMap;

use teamstrength::aggregator::aggregate;
use teamstrength::config::CoveragePolicy;
use teamstrength::params::{ParamMap, Parameter, Weights};

fn three_param_weights() -> Weights {
    let mut map = HashMap::new();
    map.insert("elo".to_string(), 0.5);
    map.insert("form".to_string(), 0.3);
    map.insert("squad_value".to_string(), 0.2);
    Weights::from_map(&map).expect("valid weights")
}

#[test]
fn partial_coverage_renormalizes_over_present_weight() {
    let mut normalized = ParamMap::new();
    normalized.set(Parameter::Elo, Some(0.8));
    normalized.set(Parameter::SquadValue, Some(0.4));

    let out = aggregate(
        &normalized,
        &three_param_weights(),
        CoveragePolicy::SkipAndRenormalize,
    );
    let expected = (0.5 * 0.8 + 0.2 * 0.4) / 0.7;
    assert!((out.overall_strength.unwrap() - expected).abs() < 1e-9);
    assert!((out.overall_strength.unwrap() - 0.6857).abs() < 1e-4);
    assert!(out.confidence < 1.0);
    assert_eq!(out.missing, vec![Parameter::Form]);
}

#[test]
fn strict_mode_yields_null_for_the_same_record() {
    let mut normalized = ParamMap::new();
    normalized.set(Parameter::Elo, Some(0.8));
    normalized.set(Parameter::SquadValue, Some(0.4));

    let out = aggregate(&normalized, &three_param_weights(), CoveragePolicy::StrictNull);
    assert_eq!(out.overall_strength, None);
}

#[test]
fn full_coverage_matches_dot_product_under_standard_weights() {
    let weights = Weights::standard();
    let mut normalized = ParamMap::new();
    let values = [0.9, 0.7, 0.3, 0.5, 1.0, 0.2, 0.6, 0.8, 0.4, 0.55];
    for (param, value) in Parameter::ALL.into_iter().zip(values) {
        normalized.set(param, Some(value));
    }

    let out = aggregate(&normalized, &weights, CoveragePolicy::SkipAndRenormalize);
    let expected: f64 = Parameter::ALL
        .into_iter()
        .zip(values)
        .map(|(p, v)| weights.get(p) * v)
        .sum();
    assert!((out.overall_strength.unwrap() - expected).abs() < 1e-12);
    assert_eq!(out.confidence, 1.0);
}

#[test]
fn nudging_one_parameter_moves_output_by_its_weight_times_delta() {
    let weights = Weights::standard();
    let mut normalized = ParamMap::new();
    for param in Parameter::ALL {
        normalized.set(param, Some(0.5));
    }
    let before = aggregate(&normalized, &weights, CoveragePolicy::SkipAndRenormalize)
        .overall_strength
        .unwrap();

    for param in Parameter::ALL {
        let mut nudged = normalized;
        let delta = 0.17;
        nudged.set(param, Some(0.5 + delta));
        let after = aggregate(&nudged, &weights, CoveragePolicy::SkipAndRenormalize)
            .overall_strength
            .unwrap();
        assert!(
            (after - before - weights.get(param) * delta).abs() < 1e-12,
            "delta response wrong for {param}"
        );
    }
}

#[test]
fn aggregation_is_deterministic() {
    let weights = Weights::standard();
    let mut normalized = ParamMap::new();
    for (i, param) in Parameter::ALL.into_iter().enumerate() {
        normalized.set(param, Some(0.1 * i as f64 / 1.3 + 0.05));
    }
    let a = aggregate(&normalized, &weights, CoveragePolicy::SkipAndRenormalize);
    let b = aggregate(&normalized, &weights, CoveragePolicy::SkipAndRenormalize);
    assert_eq!(
        a.overall_strength.unwrap().to_bits(),
        b.overall_strength.unwrap().to_bits()
    );
    assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
}
