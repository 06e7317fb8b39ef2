//! Bounded nonlinear least-squares fitting of a multi-peak model against
//! observed data.
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::data::FitArgs;
use super::shapes::{Coefficients, MultiPeakModel, PeakKind};

/// Squared-residual totals at or below this are treated as an exact fit.
const COST_FLOOR: f64 = 1e-24;

/// Once the damping factor climbs past this the trial steps have collapsed
/// onto the current point and the fit is as good as it will get.
const DAMPING_CEILING: f64 = 1e12;

/// All the ways a single bounded fit can fail
#[derive(Debug, Clone, Error)]
pub enum FitError {
    #[error("lower bound {lower} exceeds upper bound {upper} for parameter {index}")]
    InfeasibleBounds {
        index: usize,
        lower: f64,
        upper: f64,
    },
    #[error("fit failed to converge within {evaluations} function evaluations")]
    Divergence { evaluations: usize },
    #[error("expected {expected} {what}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("sample arrays contain a non-finite value at index {index}")]
    NonFiniteData { index: usize },
}

/// What to do about peaks whose fitted height could go negative.
///
/// The measurement convention treats peaks as non-negative contributions, but
/// some baselines legitimately dip below zero, so this stays a caller choice
/// expressed through the default height bounds rather than a clamp inside the
/// shape models.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeightPolicy {
    /// Height is bounded below by zero
    #[default]
    ClampToZero,
    /// Height is unrestricted
    Allow,
}

/// Component-wise box constraints over a flat parameter vector, one
/// `(lower, upper)` pair per entry.
///
/// A `Bounds` value can hold an infeasible pair; feasibility is checked when
/// a fit starts so that a bad box surfaces as that fit's failure instead of
/// being silently repaired.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        assert_eq!(
            lower.len(),
            upper.len(),
            "lower bounds length ({}) must equal upper bounds length ({})",
            lower.len(),
            upper.len()
        );
        Self { lower, upper }
    }

    /// A box that admits every finite value for `n` parameters
    pub fn unbounded(n: usize) -> Self {
        Self::new(vec![f64::NEG_INFINITY; n], vec![f64::INFINITY; n])
    }

    /// Derive a search box around an initial `(height, center, width)` guess
    /// for each peak: height up to +50 %, center within ±20 %, width within
    /// ±40 % of the guess.
    pub fn around_guess(initial: &[f64], policy: HeightPolicy) -> Self {
        assert!(
            initial.len() % 3 == 0,
            "initial parameter vector length {} is not divisible by 3",
            initial.len()
        );
        let mut lower = Vec::with_capacity(initial.len());
        let mut upper = Vec::with_capacity(initial.len());
        for group in initial.chunks_exact(3) {
            match policy {
                HeightPolicy::ClampToZero => {
                    lower.push(0.0);
                    upper.push(group[0] * 1.5);
                }
                HeightPolicy::Allow => {
                    lower.push(f64::NEG_INFINITY);
                    upper.push(f64::INFINITY);
                }
            }
            lower.push(group[1] * 0.8);
            upper.push(group[1] * 1.2);
            lower.push(group[2] * 0.6);
            upper.push(group[2] * 1.4);
        }
        Self { lower, upper }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Reject boxes where a lower bound exceeds its upper bound or either
    /// side is NaN
    pub fn validate(&self) -> Result<(), FitError> {
        for (index, (lo, hi)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(FitError::InfeasibleBounds {
                    index,
                    lower: *lo,
                    upper: *hi,
                });
            }
        }
        Ok(())
    }

    /// Project a parameter vector into the box
    pub fn project(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(p, (lo, hi))| p.clamp(*lo, *hi))
            .collect()
    }
}

/// Hyperparameters for a single bounded least-squares fit
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitConfig {
    /// The maximum number of residual evaluations to spend before declaring
    /// the fit divergent
    pub max_evaluations: usize,
    /// The relative cost improvement under which the fit is considered
    /// converged
    pub tolerance: f64,
    /// The gradient magnitude under which the current point is considered
    /// stationary
    pub gradient_tolerance: f64,
    /// The starting Levenberg-Marquardt damping factor
    pub initial_damping: f64,
}

impl FitConfig {
    pub fn max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn initial_damping(mut self, initial_damping: f64) -> Self {
        self.initial_damping = initial_damping;
        self
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 10_000,
            tolerance: 1e-10,
            gradient_tolerance: 1e-12,
            initial_damping: 1e-3,
        }
    }
}

/// Describe a completed fit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitOutcome {
    /// The fitted flat parameter vector, three entries per peak
    pub params: Vec<f64>,
    /// Root-mean-square error of the fitted model over all samples
    pub rmse: f64,
    /// The number of residual evaluations spent
    pub evaluations: usize,
}

/// Fit a summed peak model to an observed series by damped least squares.
///
/// The shape assignment per slot is fixed for the duration of one fit; trying
/// different assignments is the combination search's job. The Jacobian is
/// approximated by forward differences and every trial step is projected into
/// the bound box, so the returned parameters always satisfy the constraints
/// component-wise.
#[derive(Debug, Clone)]
pub struct CurveFitter<'a, 'b> {
    pub args: FitArgs<'a, 'b>,
}

impl<'a, 'b> CurveFitter<'a, 'b> {
    pub fn new(args: FitArgs<'a, 'b>) -> Self {
        Self { args }
    }

    fn residuals(
        &self,
        kinds: &[PeakKind],
        params: &[f64],
        coefficients: &Coefficients,
    ) -> DVector<f64> {
        let model = MultiPeakModel::assemble(kinds, params, coefficients);
        DVector::from_iterator(
            self.args.len(),
            self.args.iter().map(|(x, y)| model.density(x) - y),
        )
    }

    /// Run one bounded fit from `initial`, spending at most
    /// `config.max_evaluations` residual evaluations.
    pub fn fit(
        &self,
        kinds: &[PeakKind],
        initial: &[f64],
        coefficients: &Coefficients,
        bounds: &Bounds,
        config: &FitConfig,
    ) -> Result<FitOutcome, FitError> {
        let n_params = kinds.len() * 3;
        if kinds.is_empty() {
            return Err(FitError::DimensionMismatch {
                what: "reaction slots",
                expected: 1,
                got: 0,
            });
        }
        if initial.len() != n_params {
            return Err(FitError::DimensionMismatch {
                what: "initial parameters",
                expected: n_params,
                got: initial.len(),
            });
        }
        if bounds.len() != n_params {
            return Err(FitError::DimensionMismatch {
                what: "bound pairs",
                expected: n_params,
                got: bounds.len(),
            });
        }
        if coefficients.len() < kinds.len() {
            return Err(FitError::DimensionMismatch {
                what: "coefficient slots",
                expected: kinds.len(),
                got: coefficients.len(),
            });
        }
        if self.args.is_empty() {
            return Err(FitError::DimensionMismatch {
                what: "samples",
                expected: 1,
                got: 0,
            });
        }
        if let Some(index) = self.args.find_non_finite() {
            return Err(FitError::NonFiniteData { index });
        }
        bounds.validate()?;

        let n = self.args.len();
        let budget = config.max_evaluations.max(1);
        let mut evaluations = 0usize;

        let mut params = bounds.project(initial);
        let mut residual = self.residuals(kinds, &params, coefficients);
        evaluations += 1;
        let mut cost = residual.norm_squared();
        if !cost.is_finite() {
            return Err(FitError::Divergence { evaluations });
        }

        let mut damping = config.initial_damping;
        while cost > COST_FLOOR {
            if evaluations + n_params > budget {
                return Err(FitError::Divergence { evaluations });
            }
            let mut jacobian = DMatrix::zeros(n, n_params);
            for j in 0..n_params {
                let mut step = f64::EPSILON.sqrt() * params[j].abs().max(1.0);
                if params[j] + step > bounds.upper[j] {
                    step = -step;
                }
                let mut shifted = params.clone();
                shifted[j] = (params[j] + step).clamp(bounds.lower[j], bounds.upper[j]);
                let taken = shifted[j] - params[j];
                if taken == 0.0 {
                    // parameter pinned by a degenerate box, leave the column zero
                    continue;
                }
                let shifted_residual = self.residuals(kinds, &shifted, coefficients);
                evaluations += 1;
                jacobian.set_column(j, &((shifted_residual - &residual) / taken));
            }

            let gradient = jacobian.transpose() * &residual;
            if gradient.amax() < config.gradient_tolerance {
                break;
            }
            let hessian = jacobian.transpose() * &jacobian;
            let descent = -&gradient;

            let mut improved = false;
            while !improved {
                let mut damped = hessian.clone();
                for i in 0..n_params {
                    damped[(i, i)] += damping * hessian[(i, i)].max(1e-12);
                }
                let step = damped
                    .clone()
                    .cholesky()
                    .map(|ch| ch.solve(&descent))
                    .or_else(|| damped.lu().solve(&descent));
                let step = match step {
                    Some(step) => step,
                    None => {
                        damping *= 10.0;
                        if damping > DAMPING_CEILING {
                            break;
                        }
                        continue;
                    }
                };

                let candidate: Vec<f64> = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (p + step[i]).clamp(bounds.lower[i], bounds.upper[i]))
                    .collect();
                if evaluations >= budget {
                    return Err(FitError::Divergence { evaluations });
                }
                let candidate_residual = self.residuals(kinds, &candidate, coefficients);
                evaluations += 1;
                let candidate_cost = candidate_residual.norm_squared();

                if candidate_cost.is_finite() && candidate_cost < cost {
                    let improvement = (cost - candidate_cost) / cost.max(f64::MIN_POSITIVE);
                    params = candidate;
                    residual = candidate_residual;
                    cost = candidate_cost;
                    damping = (damping * 0.25).max(1e-12);
                    improved = true;
                    if improvement < config.tolerance {
                        let rmse = (cost / n as f64).sqrt();
                        log::trace!("converged on improvement {improvement:.3e}, rmse {rmse:.6}");
                        return Ok(FitOutcome {
                            params,
                            rmse,
                            evaluations,
                        });
                    }
                } else {
                    damping *= 10.0;
                    if damping > DAMPING_CEILING {
                        break;
                    }
                }
            }
            if !improved {
                // the trust step collapsed; the current point is the answer
                break;
            }
        }

        let rmse = (cost / n as f64).sqrt();
        log::trace!("fit finished after {evaluations} evaluations, rmse {rmse:.6}");
        Ok(FitOutcome {
            params,
            rmse,
            evaluations,
        })
    }
}
