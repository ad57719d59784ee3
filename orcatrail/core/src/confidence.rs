//! Every confidence blend in the engine goes through [`combine_confidence`].

/// Clamps into `[0, 1]`, mapping non-finite values to `0`.
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Weighted mean of `values`, paired positionally with `weights`.
///
/// Pairs with a non-finite value or a non-positive weight are ignored and the
/// remaining weights are renormalised, so a missing input does not drag the
/// blend towards zero. Returns `0.0` when nothing usable remains. The result
/// always lies in `[0, 1]`.
#[must_use]
pub fn combine_confidence(values: &[f32], weights: &[f32]) -> f32 {
    let (weighted, total) = values
        .iter()
        .zip(weights)
        .filter(|(value, weight)| value.is_finite() && weight.is_finite() && **weight > 0.0)
        .fold((0.0_f32, 0.0_f32), |(sum, total), (value, weight)| {
            (sum + clamp_unit(*value) * weight, total + weight)
        });
    if total <= f32::EPSILON {
        0.0
    } else {
        clamp_unit(weighted / total)
    }
}

/// Unweighted mean, `0.0` for an empty slice.
#[must_use]
pub fn mean_confidence(values: &[f32]) -> f32 {
    combine_confidence(values, &vec![1.0; values.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blends_with_documented_weights() {
        let blended = combine_confidence(&[0.5, 1.0], &[0.4, 0.6]);
        assert!((blended - 0.8).abs() < 1e-6);
    }

    #[test]
    fn missing_inputs_renormalise() {
        assert!((combine_confidence(&[f32::NAN, 0.6], &[0.4, 0.6]) - 0.6).abs() < 1e-6);
        assert!((combine_confidence(&[0.9, 0.6], &[0.0, 0.6]) - 0.6).abs() < 1e-6);
        assert_eq!(combine_confidence(&[], &[]), 0.0);
    }

    #[test]
    fn never_leaves_unit_interval() {
        assert_eq!(combine_confidence(&[3.0, 2.0], &[1.0, 1.0]), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f32::INFINITY), 0.0);
        assert!((mean_confidence(&[0.2, 0.4]) - 0.3).abs() < 1e-6);
    }
}
