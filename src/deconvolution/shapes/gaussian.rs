#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gaussian peak shape model
///
/// ```math
/// y = h\exp\left({\frac{-(x - c)^2}{2w^2}}\right)
/// ```
///
/// The model itself places no restriction on `height`; callers that require
/// non-negative peaks express that through their fit bounds instead.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gaussian {
    pub height: f64,
    pub center: f64,
    pub width: f64,
}

impl Gaussian {
    pub fn new(height: f64, center: f64, width: f64) -> Self {
        Self {
            height,
            center,
            width,
        }
    }

    /// Compute the theoretical signal magnitude at a specified coordinate
    pub fn density(&self, x: f64) -> f64 {
        self.height * (-(x - self.center).powi(2) / (2.0 * self.width.powi(2))).exp()
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
    fn test_density_at_center() {
        let peak = Gaussian::new(2.5, 400.0, 15.0);
        assert_eq!(peak.density(peak.center), peak.height);
    }

    #[test]
    fn test_symmetry() {
        let peak = Gaussian::new(1.0, 350.0, 20.0);
        for d in [0.1, 1.0, 5.0, 37.5, 120.0] {
            let left = peak.density(peak.center - d);
            let right = peak.density(peak.center + d);
            assert!(
                (left - right).abs() < 1e-12,
                "density at ±{d} differs: {left} vs {right}"
            );
        }
    }

    #[test]
    fn test_negative_height_passes_through() {
        let peak = Gaussian::new(-1.0, 0.0, 1.0);
        assert_eq!(peak.density(0.0), -1.0);
    }
}
