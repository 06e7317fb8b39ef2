use num_traits::{Float, ToPrimitive};

pub fn gridspace<T: Float + ToPrimitive>(start: T, end: T, step: T) -> Vec<T> {
    let distance = end - start;
    let steps = (distance / step).to_usize().unwrap();
    let mut result = Vec::with_capacity(steps);
    for i in 0..steps {
        result.push(start + T::from(i).unwrap() * step);
    }
    result
}

/// Check if the values in `it` are monotonically ascending or flat
pub fn is_increasing<F: Float + PartialOrd>(it: &[F]) -> bool {
    let (ascending, _) = it
        .iter()
        .fold((true, F::min_value()), |(ascending, last_val), val| {
            if !ascending {
                (false, last_val)
            } else {
                ((last_val <= *val), *val)
            }
        });
    ascending
}

/// Numerically differentiate `y` with respect to `x` and negate the result,
/// producing the conventional decreasing-reaction-rate curve for a mass-loss
/// signal.
///
/// Interior points use the three-point stencil weighted for uneven spacing,
/// so a non-uniform temperature axis is differentiated correctly. The first
/// and last points fall back to one-sided differences.
pub fn reaction_rate(x: &[f64], y: &[f64]) -> Vec<f64> {
    assert_eq!(
        x.len(),
        y.len(),
        "x array length ({}) must equal y length ({})",
        x.len(),
        y.len()
    );
    let n = x.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let mut rate = Vec::with_capacity(n);
    rate.push(-(y[1] - y[0]) / (x[1] - x[0]));
    for i in 1..n - 1 {
        let before = x[i] - x[i - 1];
        let after = x[i + 1] - x[i];
        let dy = (before.powi(2) * y[i + 1] + (after.powi(2) - before.powi(2)) * y[i]
            - after.powi(2) * y[i - 1])
            / (before * after * (before + after));
        rate.push(-dy);
    }
    rate.push(-(y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]));
    rate
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gridspace() {
        let grid = gridspace(0.0, 10.0, 0.5);
        assert_eq!(grid.len(), 20);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[1], 0.5);
        assert_eq!(grid[19], 9.5);
    }

    #[test]
    fn test_is_increasing() {
        assert!(is_increasing(&[0.0, 0.5, 0.5, 1.0]));
        assert!(!is_increasing(&[0.0, 0.5, 0.25]));
        assert!(is_increasing::<f64>(&[]));
    }

    #[test]
    fn test_reaction_rate_sign_convention() {
        // A decaying exponential has a negative slope everywhere, so the
        // negated gradient must be non-negative everywhere.
        let x = gridspace(0.0, 5.0, 0.01);
        let y: Vec<f64> = x.iter().map(|t: &f64| (-t).exp()).collect();
        let rate = reaction_rate(&x, &y);
        assert_eq!(rate.len(), x.len());
        for (i, r) in rate.iter().enumerate() {
            assert!(*r >= 0.0, "rate[{i}] = {r} should be non-negative");
        }
    }

    #[test]
    fn test_reaction_rate_uneven_spacing() {
        // y = 3x sampled on an uneven grid still differentiates to exactly 3
        let x = vec![0.0, 0.1, 0.35, 0.4, 1.0, 2.5];
        let y: Vec<f64> = x.iter().map(|t| 3.0 * t).collect();
        for (i, r) in reaction_rate(&x, &y).iter().enumerate() {
            assert!(
                (r + 3.0).abs() < 1e-9,
                "rate[{i}] = {r}, expected -3 before negation"
            );
        }
    }

    #[test]
    fn test_reaction_rate_short_input() {
        assert_eq!(reaction_rate(&[1.0], &[2.0]), vec![0.0]);
        let rate = reaction_rate(&[0.0, 2.0], &[1.0, 0.0]);
        assert_eq!(rate, vec![0.5, 0.5]);
    }
}
