use crate::params::Direction;

/// Normalized value reserved for the degenerate cases: fewer than two
/// non-null raws, or all non-null raws equal.
pub const DEGENERATE_VALUE: f64 = 0.5;

/// Min-max rescale of one parameter's raw values over one (competition,
/// season) peer group. Nulls stay null; the mapping depends only on the
/// multiset of raw values, so equal raws normalize equally and caller order
/// is irrelevant. Lower-is-better parameters come out inverted.
pub fn normalize<K: Copy>(
    values: &[(K, Option<f64>)],
    direction: Direction,
) -> Vec<(K, Option<f64>)> {
    let present: Vec<f64> = values.iter().filter_map(|(_, v)| *v).collect();

    if present.len() < 2 {
        return values
            .iter()
            .map(|(key, v)| (*key, v.map(|_| DEGENERATE_VALUE)))
            .collect();
    }

    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    values
        .iter()
        .map(|(key, v)| {
            let normalized = v.map(|raw| {
                if range == 0.0 {
                    DEGENERATE_VALUE
                } else {
                    let scaled = (raw - min) / range;
                    match direction {
                        Direction::HigherBetter => scaled,
                        Direction::LowerBetter => 1.0 - scaled,
                    }
                }
            });
            (*key, normalized)
        })
        .collect()
}

/// Linear rescale of already-aggregated strengths into [0,1] within a group
/// (top record 1.0, bottom 0.0). Same degenerate policy as `normalize`.
pub fn rescale_strengths<K: Copy>(values: &[(K, Option<f64>)]) -> Vec<(K, Option<f64>)> {
    normalize(values, Direction::HigherBetter)
}
