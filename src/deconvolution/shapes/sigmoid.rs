#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The largest magnitude `exp` can take before overflowing an `f64`.
const EXP_ARG_LIMIT: f64 = 709.0;

fn logistic(t: f64) -> f64 {
    1.0 / (1.0 + (-t.clamp(-EXP_ARG_LIMIT, EXP_ARG_LIMIT)).exp())
}

/// Asymmetric double sigmoid peak shape model: the product of a rising
/// logistic flank centered at `center - width/2` with slope `s1` and a
/// falling flank centered at `center + width/2` with slope `s2`, scaled by
/// `height`.
///
/// Exponent arguments are clamped before exponentiation so the model stays
/// finite over the whole real line even for extreme slope parameters.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AsymmetricDoubleSigmoid {
    pub height: f64,
    pub center: f64,
    pub width: f64,
    pub s1: f64,
    pub s2: f64,
}

impl AsymmetricDoubleSigmoid {
    pub fn new(height: f64, center: f64, width: f64, s1: f64, s2: f64) -> Self {
        Self {
            height,
            center,
            width,
            s1,
            s2,
        }
    }

    /// Compute the theoretical signal magnitude at a specified coordinate
    pub fn density(&self, x: f64) -> f64 {
        let rising = logistic((x - self.center + self.width / 2.0) / self.s1);
        let falling = 1.0 - logistic((x - self.center - self.width / 2.0) / self.s2);
        self.height * rising * falling
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
    fn test_bounded_over_wide_sweep() {
        let peak = AsymmetricDoubleSigmoid::new(5.0, 100.0, 30.0, 2.0, 8.0);
        let mut x = peak.center - 2e6;
        while x <= peak.center + 2e6 {
            let y = peak.density(x);
            assert!(y.is_finite(), "non-finite density at x = {x}");
            assert!(
                (0.0..=peak.height).contains(&y),
                "density {y} escaped [0, {}] at x = {x}",
                peak.height
            );
            x += 1e4;
        }
    }

    #[test]
    fn test_positive_inside_plateau() {
        let peak = AsymmetricDoubleSigmoid::new(1.0, 0.0, 20.0, 1.0, 1.0);
        assert!(peak.density(0.0) > 0.9);
        assert!(peak.density(-40.0) < 0.05);
        assert!(peak.density(40.0) < 0.05);
    }

    #[test]
    fn test_steep_slopes_do_not_overflow() {
        let peak = AsymmetricDoubleSigmoid::new(1.0, 0.0, 10.0, 1e-12, 1e-12);
        for x in [-1e8, -5.0, 0.0, 5.0, 1e8] {
            assert!(peak.density(x).is_finite());
        }
    }
}
