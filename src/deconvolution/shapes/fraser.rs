use std::f64::consts::LN_2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fraser-Suzuki peak shape model, a log-normal style asymmetric peak
///
/// ```math
/// y = h\exp\left(-\ln{2}\left[\frac{\ln\left(1 + 2a\frac{x - c}{w}\right)}{a}\right]^2\right)
/// ```
///
/// The logarithm's argument goes non-positive on one flank once the skew `a`
/// is non-zero; the model is defined to be exactly zero there. Any non-finite
/// intermediate (including the degenerate `a = 0` case) also collapses to
/// zero rather than leaking NaN into a summed signal.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FraserSuzuki {
    pub height: f64,
    pub center: f64,
    pub width: f64,
    pub skew: f64,
}

impl FraserSuzuki {
    pub fn new(height: f64, center: f64, width: f64, skew: f64) -> Self {
        Self {
            height,
            center,
            width,
            skew,
        }
    }

    /// Compute the theoretical signal magnitude at a specified coordinate
    pub fn density(&self, x: f64) -> f64 {
        let arg = 1.0 + 2.0 * self.skew * (x - self.center) / self.width;
        if arg <= 0.0 {
            return 0.0;
        }
        let value = self.height * (-LN_2 * (arg.ln() / self.skew).powi(2)).exp();
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    /// Given a coordinate sequence, produce the complementary sequence of
    /// theoretical magnitudes
    pub fn predict(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.density(*x)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_undefined_flank_is_zero() {
        let peak = FraserSuzuki::new(1.0, 300.0, 40.0, -1.0);
        // arg = 1 - 2(x - c)/w <= 0 once x >= c + w/2
        for x in [320.0, 350.0, 500.0, 1e6] {
            assert_eq!(peak.density(x), 0.0, "expected zero at x = {x}");
        }
        assert!(peak.density(299.0) > 0.0);
    }

    #[test]
    fn test_peak_value_at_center() {
        let peak = FraserSuzuki::new(3.0, 300.0, 40.0, -0.5);
        // arg is exactly 1 at the center, so the exponent vanishes
        assert!((peak.density(300.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_skew_is_zero_not_nan() {
        let peak = FraserSuzuki::new(1.0, 300.0, 40.0, 0.0);
        for x in [250.0, 300.0, 350.0] {
            let y = peak.density(x);
            assert!(y.is_finite());
            assert_eq!(y, 0.0);
        }
    }

    #[test]
    fn test_never_nan_over_wide_sweep() {
        let peak = FraserSuzuki::new(1.0, 0.0, 1.0, 2.0);
        let mut x = -1e6;
        while x <= 1e6 {
            assert!(peak.density(x).is_finite());
            x += 1e4;
        }
    }
}
