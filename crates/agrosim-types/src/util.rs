//! Small numeric helpers shared by all submodels.

/// Clamp `value` into the closed interval `[min, max]`.
///
/// Unlike [`f64::clamp`] this never panics when `min > max`; the lower
/// bound wins in that case, matching how crop parameters with inverted
/// limits are treated.
pub const fn limit(min: f64, max: f64, value: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        if max < min { min } else { max }
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_inside_range_is_identity() {
        assert!((limit(0.0, 1.0, 0.25) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn limit_clamps_both_sides() {
        assert!((limit(0.0, 1.0, -3.0)).abs() < f64::EPSILON);
        assert!((limit(0.0, 1.0, 3.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn limit_with_inverted_bounds_returns_min() {
        assert!((limit(2.0, 1.0, 5.0) - 2.0).abs() < f64::EPSILON);
    }
}
