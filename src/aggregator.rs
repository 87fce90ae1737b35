use crate::config::CoveragePolicy;
use crate::params::{ParamMap, Parameter, Weights};

/// Result of folding one record's normalized values under the active weights.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutcome {
    pub overall_strength: Option<f64>,
    /// Share of active weight backed by present values; 1.0 when complete,
    /// 0.0 when nothing was aggregated.
    pub confidence: f64,
    pub missing: Vec<Parameter>,
}

/// Weighted sum over normalized values. Pure: same inputs, same output.
/// Under `SkipAndRenormalize` a partial record aggregates over the present
/// parameters and divides by their weight; under `StrictNull` any missing
/// positively-weighted parameter makes the result null.
pub fn aggregate(
    normalized: &ParamMap,
    weights: &Weights,
    policy: CoveragePolicy,
) -> AggregateOutcome {
    let mut weighted_sum = 0.0;
    let mut covered_weight = 0.0;
    let mut missing = Vec::new();

    for (param, weight) in weights.active() {
        match normalized.get(param) {
            Some(value) => {
                weighted_sum += weight * value;
                covered_weight += weight;
            }
            None => missing.push(param),
        }
    }

    let total_active: f64 = weights.active().map(|(_, w)| w).sum();
    let confidence = if total_active > 0.0 {
        covered_weight / total_active
    } else {
        0.0
    };

    let overall_strength = match policy {
        CoveragePolicy::StrictNull => missing.is_empty().then_some(weighted_sum),
        CoveragePolicy::SkipAndRenormalize => {
            (covered_weight > 0.0).then(|| weighted_sum / covered_weight)
        }
    };

    AggregateOutcome {
        overall_strength,
        confidence,
        missing,
    }
}
