//! The outer coefficient optimization loop.
//!
//! The inner machinery fits peak parameters for a *fixed* set of shape
//! coefficients (Fraser-Suzuki skew, sigmoid slopes). This module treats
//! those coefficients as free variables and minimizes the best achievable
//! RMSE over them, re-running the whole combination search as its objective
//! function. Two engines are provided: a population-based differential
//! evolution search over the coefficient box, and a cheaper projected
//! gradient descent seeded at the current coefficients.
//!
//! The objective deliberately has side effects: every evaluation writes the
//! best fit found so far back into the dataset and pokes the refresh hook, so
//! a user watching the host application sees intermediate solutions as they
//! are discovered.
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::table::TableError;

use super::data::FitArgs;
use super::fitter::{Bounds, FitConfig};
use super::hooks::{MessageSink, RefreshHook};
use super::search::{search_best, Combination, SearchError};
use super::shapes::{Coefficients, PeakKind};

/// A shared flag for cooperative cancellation.
///
/// The optimization loop checks it inside every objective evaluation and once
/// per iteration, so the worst-case latency between requesting cancellation
/// and the loop unwinding is one inner search batch.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// All the ways the outer optimization can end without a result
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// The user asked for the run to stop; whatever the last completed
    /// evaluation wrote to the dataset remains
    #[error("coefficient optimization cancelled")]
    Cancelled,
    #[error("infeasible coefficient constraints: {0}")]
    Infeasible(String),
    #[error("the reaction table is empty")]
    NoPeaks,
    #[error("expected one shape selection set per reaction ({expected}), got {got}")]
    SelectionMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// How trial vectors are generated in differential evolution
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeStrategy {
    /// x_best + F * (x_r1 - x_r2)
    #[default]
    Best1,
    /// x_r1 + F * (x_r2 - x_r3)
    Rand1,
    /// x_i + F * (x_best - x_i) + F * (x_r1 - x_r2)
    CurrentToBest1,
}

impl DeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeStrategy::Best1 => "best1",
            DeStrategy::Rand1 => "rand1",
            DeStrategy::CurrentToBest1 => "currenttobest1",
        }
    }
}

impl fmt::Display for DeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best1" => Ok(DeStrategy::Best1),
            "rand1" => Ok(DeStrategy::Rand1),
            "currenttobest1" => Ok(DeStrategy::CurrentToBest1),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown differential evolution strategy '{0}'")]
pub struct UnknownStrategy(pub String);

/// Differential evolution over a finite coefficient box.
///
/// A population of candidate coefficient vectors evolves by mutation and
/// binomial crossover; every knob here is surfaced to the host's options
/// table so a user can trade run time against search breadth.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DifferentialEvolution {
    pub strategy: DeStrategy,
    /// Population size multiplier; the population holds
    /// `population * parameter count` members (at least 5)
    pub population: usize,
    /// Differential weight F applied to the difference vectors
    pub mutation: f64,
    /// Crossover probability per gene
    pub recombination: f64,
    /// Relative spread of population costs under which the run is converged
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for DifferentialEvolution {
    fn default() -> Self {
        Self {
            strategy: DeStrategy::default(),
            population: 15,
            mutation: 0.8,
            recombination: 0.7,
            tolerance: 0.01,
            max_iterations: 100,
            seed: None,
        }
    }
}

impl DifferentialEvolution {
    pub fn strategy(mut self, strategy: DeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn population(mut self, population: usize) -> Self {
        self.population = population;
        self
    }

    pub fn mutation(mut self, mutation: f64) -> Self {
        self.mutation = mutation;
        self
    }

    pub fn recombination(mut self, recombination: f64) -> Self {
        self.recombination = recombination;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn trial_vector(
        &self,
        target: usize,
        population: &[Vec<f64>],
        costs: &[f64],
        bounds: &[(f64, f64)],
        rng: &mut StdRng,
    ) -> Vec<f64> {
        let n_params = bounds.len();
        let best = argmin(costs);

        let mut others: Vec<usize> = (0..population.len())
            .filter(|&i| i != target && i != best)
            .collect();
        others.shuffle(rng);

        let mut trial = match self.strategy {
            DeStrategy::Best1 => {
                let (r1, r2) = (others[0], others[1]);
                (0..n_params)
                    .map(|j| {
                        population[best][j]
                            + self.mutation * (population[r1][j] - population[r2][j])
                    })
                    .collect::<Vec<_>>()
            }
            DeStrategy::Rand1 => {
                let (r1, r2, r3) = (others[0], others[1], others[2]);
                (0..n_params)
                    .map(|j| {
                        population[r1][j]
                            + self.mutation * (population[r2][j] - population[r3][j])
                    })
                    .collect::<Vec<_>>()
            }
            DeStrategy::CurrentToBest1 => {
                let (r1, r2) = (others[0], others[1]);
                (0..n_params)
                    .map(|j| {
                        population[target][j]
                            + self.mutation * (population[best][j] - population[target][j])
                            + self.mutation * (population[r1][j] - population[r2][j])
                    })
                    .collect::<Vec<_>>()
            }
        };

        // binomial crossover, keeping at least one mutated gene
        let j_rand = rng.gen_range(0..n_params);
        for j in 0..n_params {
            if j != j_rand && rng.gen::<f64>() > self.recombination {
                trial[j] = population[target][j];
            }
        }
        for (j, value) in trial.iter_mut().enumerate() {
            *value = value.clamp(bounds[j].0, bounds[j].1);
        }
        trial
    }

    /// Minimize `objective` over the box, optionally seeding one population
    /// member at `start`.
    ///
    /// The objective may fail (typically with [`OptimizeError::Cancelled`]);
    /// any failure aborts the run immediately and propagates.
    pub fn minimize<F>(
        &self,
        mut objective: F,
        bounds: &[(f64, f64)],
        start: Option<&[f64]>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<f64>, f64), OptimizeError>
    where
        F: FnMut(&[f64]) -> Result<f64, OptimizeError>,
    {
        validate_box(bounds, true)?;
        let n_params = bounds.len();
        let pop_size = (self.population * n_params).max(5);

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut population: Vec<Vec<f64>> = (0..pop_size)
            .map(|_| {
                bounds
                    .iter()
                    .map(|(lo, hi)| rng.gen_range(*lo..=*hi))
                    .collect()
            })
            .collect();
        if let Some(start) = start {
            population[0] = bounds
                .iter()
                .zip(start.iter())
                .map(|((lo, hi), v)| v.clamp(*lo, *hi))
                .collect();
        }

        let mut costs = Vec::with_capacity(pop_size);
        for member in &population {
            costs.push(objective(member)?);
        }

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(OptimizeError::Cancelled);
            }
            for i in 0..pop_size {
                let trial = self.trial_vector(i, &population, &costs, bounds, &mut rng);
                let trial_cost = objective(&trial)?;
                if trial_cost < costs[i] {
                    population[i] = trial;
                    costs[i] = trial_cost;
                }
            }

            let best = costs[argmin(&costs)];
            let mean = costs.iter().sum::<f64>() / costs.len() as f64;
            let spread = (costs
                .iter()
                .map(|c| (c - mean).powi(2))
                .sum::<f64>()
                / costs.len() as f64)
                .sqrt();
            log::debug!("generation {iteration}: best cost {best:.6}, spread {spread:.3e}");
            if spread.is_finite() && spread <= self.tolerance * mean.abs() {
                log::debug!("population converged after {iteration} generations");
                break;
            }
        }

        let best = argmin(&costs);
        Ok((population.swap_remove(best), costs[best]))
    }
}

/// Projected gradient descent inside a coefficient box.
///
/// The gradient is estimated by forward differences, each step is projected
/// back into the box, and the step length backtracks until it improves the
/// objective. Quick to converge near a good starting point, at the price of
/// only finding the local basin.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProjectedGradient {
    pub max_iterations: usize,
    /// Initial step length along the negated gradient
    pub step: f64,
    /// Gradient magnitude under which the point is considered stationary
    pub tolerance: f64,
    /// Relative perturbation used for the finite-difference gradient
    pub fd_step: f64,
}

impl Default for ProjectedGradient {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            step: 0.1,
            tolerance: 1e-6,
            fd_step: 1e-6,
        }
    }
}

impl ProjectedGradient {
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Minimize `objective` starting from `start`, staying inside the box.
    pub fn minimize<F>(
        &self,
        mut objective: F,
        bounds: &[(f64, f64)],
        start: &[f64],
        cancel: &CancellationToken,
    ) -> Result<(Vec<f64>, f64), OptimizeError>
    where
        F: FnMut(&[f64]) -> Result<f64, OptimizeError>,
    {
        validate_box(bounds, false)?;
        let n_params = bounds.len();
        assert_eq!(start.len(), n_params);

        let mut point: Vec<f64> = start
            .iter()
            .zip(bounds.iter())
            .map(|(v, (lo, hi))| v.clamp(*lo, *hi))
            .collect();
        let mut cost = objective(&point)?;
        let mut step = self.step;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(OptimizeError::Cancelled);
            }

            let mut gradient = vec![0.0; n_params];
            for j in 0..n_params {
                let h = self.fd_step * point[j].abs().max(1.0);
                let mut shifted = point.clone();
                shifted[j] = (point[j] + h).min(bounds[j].1);
                if shifted[j] == point[j] {
                    shifted[j] = (point[j] - h).max(bounds[j].0);
                }
                let taken = shifted[j] - point[j];
                if taken == 0.0 {
                    continue;
                }
                gradient[j] = (objective(&shifted)? - cost) / taken;
            }

            let magnitude = gradient.iter().fold(0.0f64, |acc, g| acc.max(g.abs()));
            if magnitude < self.tolerance {
                log::debug!("stationary after {iteration} iterations, cost {cost:.6}");
                break;
            }

            let mut improved = false;
            while step > 1e-12 {
                let candidate: Vec<f64> = point
                    .iter()
                    .zip(gradient.iter())
                    .zip(bounds.iter())
                    .map(|((p, g), (lo, hi))| (p - step * g).clamp(*lo, *hi))
                    .collect();
                let candidate_cost = objective(&candidate)?;
                if candidate_cost < cost {
                    point = candidate;
                    cost = candidate_cost;
                    step *= 1.2;
                    improved = true;
                    break;
                }
                step *= 0.5;
            }
            if !improved {
                break;
            }
        }
        Ok((point, cost))
    }
}

/// Which outer engine [`CoefficientOptimizer`] runs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OptimizerStrategy {
    #[default]
    DifferentialEvolution,
    ProjectedGradient,
}

/// Tune shape coefficients against a live dataset.
///
/// Each objective evaluation re-derives initial peak parameters from the
/// dataset's current rows, runs the full combination search, writes the best
/// fit back into the rows and reconstruction columns, and notifies the
/// refresh hook. The dataset therefore always reflects the last completed
/// evaluation, including after a cancellation.
pub struct CoefficientOptimizer<'a> {
    dataset: &'a Mutex<Dataset>,
    x_column: String,
    y_column: String,
    sink: &'a dyn MessageSink,
    refresh: &'a dyn RefreshHook,
    cancel: CancellationToken,
}

impl<'a> CoefficientOptimizer<'a> {
    pub fn new(
        dataset: &'a Mutex<Dataset>,
        x_column: impl Into<String>,
        y_column: impl Into<String>,
        sink: &'a dyn MessageSink,
        refresh: &'a dyn RefreshHook,
    ) -> Self {
        Self {
            dataset,
            x_column: x_column.into(),
            y_column: y_column.into(),
            sink,
            refresh,
            cancel: CancellationToken::new(),
        }
    }

    /// The token a host hands to its cancel button
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn evaluate(
        &self,
        flat: &[f64],
        combinations: &[Combination],
    ) -> Result<f64, OptimizeError> {
        if self.cancel.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        let mut dataset = self.dataset.lock().unwrap();
        let x = dataset.data.numeric_column(&self.x_column)?;
        let y = dataset.data.numeric_column(&self.y_column)?;
        let initial = dataset.peaks.initial_params();
        let coefficients = Coefficients::from_flat(flat);
        let bounds = Bounds::around_guess(&initial, dataset.options.height_policy);
        let config = FitConfig::default().max_evaluations(dataset.options.max_evaluations);
        let args = FitArgs::from((x.as_slice(), y.as_slice()));

        match search_best(
            &args,
            combinations,
            &initial,
            &coefficients,
            &bounds,
            &config,
            self.sink,
        ) {
            Ok(best) => {
                self.sink
                    .post_message(&format!("best RMSE: {:.5}", best.rmse));
                self.sink
                    .post_message(&format!("best combination: {}", best.combination));
                let rmse = best.rmse;
                dataset.apply_best_fit(&best, &coefficients, &self.y_column, &x)?;
                drop(dataset);
                self.refresh.refresh();
                Ok(rmse)
            }
            Err(SearchError::NoResult) => {
                log::warn!("no combination fit the data for the current coefficients");
                self.sink
                    .post_message("no combination produced a fit, skipping");
                Ok(f64::INFINITY)
            }
        }
    }

    /// Optimize the coefficient vector for the reactions currently in the
    /// dataset, restricted to the `allowed` shape families per reaction.
    ///
    /// On success the winning coefficients are written back to every
    /// qualifying reaction row and a final reconstruction pass refreshes the
    /// per-peak and cumulative columns.
    pub fn optimize(&self, allowed: &[Vec<PeakKind>]) -> Result<Vec<f64>, OptimizeError> {
        let (start, boxes, strategy, evolution, gradient) = {
            let dataset = self.dataset.lock().unwrap();
            let n = dataset.peaks.len();
            if n == 0 {
                return Err(OptimizeError::NoPeaks);
            }
            if allowed.len() != n {
                return Err(OptimizeError::SelectionMismatch {
                    expected: n,
                    got: allowed.len(),
                });
            }
            (
                dataset.peaks.coefficients().to_flat(),
                dataset.options.coefficient_bounds.flatten_for(n),
                dataset.options.strategy,
                dataset.options.evolution.clone(),
                dataset.options.gradient.clone(),
            )
        };

        let combinations = super::search::enumerate_combinations(allowed);
        if combinations.is_empty() {
            return Err(OptimizeError::Infeasible(
                "no shape families selected for at least one reaction".to_string(),
            ));
        }
        let objective = |coefficients: &[f64]| self.evaluate(coefficients, &combinations);

        let (best, cost) = match strategy {
            OptimizerStrategy::DifferentialEvolution => {
                evolution.minimize(objective, &boxes, Some(&start), &self.cancel)?
            }
            OptimizerStrategy::ProjectedGradient => {
                gradient.minimize(objective, &boxes, &start, &self.cancel)?
            }
        };

        {
            let mut dataset = self.dataset.lock().unwrap();
            let coefficients = Coefficients::from_flat(&best);
            dataset.peaks.apply_coefficients(&coefficients);
            let x = dataset.data.numeric_column(&self.x_column)?;
            dataset.apply_reconstruction(&self.y_column, &x)?;
        }
        self.refresh.refresh();
        self.sink.post_message(&format!(
            "coefficient optimization finished, best RMSE {cost:.5}"
        ));
        Ok(best)
    }
}

fn argmin(costs: &[f64]) -> usize {
    costs
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn validate_box(bounds: &[(f64, f64)], require_finite: bool) -> Result<(), OptimizeError> {
    if bounds.is_empty() {
        return Err(OptimizeError::Infeasible(
            "no coefficients to optimize".to_string(),
        ));
    }
    for (i, (lo, hi)) in bounds.iter().enumerate() {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(OptimizeError::Infeasible(format!(
                "coefficient {i}: [{lo}, {hi}]"
            )));
        }
        if require_finite && (!lo.is_finite() || !hi.is_finite()) {
            return Err(OptimizeError::Infeasible(format!(
                "coefficient {i}: [{lo}, {hi}] is not a finite box"
            )));
        }
    }
    Ok(())
}
