//! Exhaustive search over peak shape assignments.
//!
//! Every allowed assignment of a shape family to each reaction slot gets its
//! own independent bounded fit, and the assignment with the lowest RMSE wins.
//! The combinatorial count stays small in practice (a few reactions, two or
//! three candidate shapes each), so each combination is given a dedicated
//! worker thread and the call joins them all before selecting.
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Mutex;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::data::FitArgs;
use super::fitter::{Bounds, CurveFitter, FitConfig, FitOutcome};
use super::hooks::MessageSink;
use super::shapes::{Coefficients, PeakKind};

/// An ordered assignment of one shape family per reaction slot.
///
/// Combinations compare and hash by value so they can key a results map, and
/// order lexicographically by slot, which is the documented tie-break when
/// two assignments reach the same RMSE.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Combination(Vec<PeakKind>);

impl Combination {
    pub fn new(kinds: Vec<PeakKind>) -> Self {
        Self(kinds)
    }

    pub fn kinds(&self) -> &[PeakKind] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Combination {
    type Target = [PeakKind];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<PeakKind>> for Combination {
    fn from(kinds: Vec<PeakKind>) -> Self {
        Self(kinds)
    }
}

impl FromIterator<PeakKind> for Combination {
    fn from_iter<T: IntoIterator<Item = PeakKind>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{kind}")?;
        }
        write!(f, ")")
    }
}

/// Enumerate the cartesian product of per-slot allowed shape families, in
/// lexicographic slot order.
///
/// A slot with an empty allowed set admits no assignment at all, so the
/// product is empty.
pub fn enumerate_combinations(allowed: &[Vec<PeakKind>]) -> Vec<Combination> {
    if allowed.is_empty() || allowed.iter().any(|set| set.is_empty()) {
        return Vec::new();
    }
    let mut partial: Vec<Vec<PeakKind>> = vec![Vec::new()];
    for set in allowed {
        let mut extended = Vec::with_capacity(partial.len() * set.len());
        for prefix in &partial {
            for kind in set {
                let mut assignment = prefix.clone();
                assignment.push(*kind);
                extended.push(assignment);
            }
        }
        partial = extended;
    }
    partial.into_iter().map(Combination::from).collect()
}

/// Enumerate every assignment of `kinds` across `n_slots` slots
pub fn enumerate_uniform(kinds: &[PeakKind], n_slots: usize) -> Vec<Combination> {
    enumerate_combinations(&vec![kinds.to_vec(); n_slots])
}

/// The winning result of a combination search
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BestFit {
    pub combination: Combination,
    /// Fitted flat parameters, three per slot in slot order
    pub params: Vec<f64>,
    pub rmse: f64,
}

/// All the ways a whole search batch can fail
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// Every combination's fit failed; distinguishable from a zero-RMSE win
    #[error("every peak shape combination failed to fit")]
    NoResult,
}

fn fit_one(
    fitter: &CurveFitter<'_, '_>,
    combination: &Combination,
    initial: &[f64],
    coefficients: &Coefficients,
    bounds: &Bounds,
    config: &FitConfig,
    results: &Mutex<HashMap<Combination, FitOutcome>>,
    sink: &dyn MessageSink,
) {
    log::debug!("starting fit for combination {combination}");
    match fitter.fit(combination, initial, coefficients, bounds, config) {
        Ok(outcome) => {
            sink.post_message(&format!("{combination}: RMSE {:.5}", outcome.rmse));
            results.lock().unwrap().insert(combination.clone(), outcome);
        }
        Err(err) => {
            log::warn!("combination {combination} failed: {err}");
        }
    }
}

// Can't inline cfg-if
cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        #[allow(clippy::too_many_arguments)]
        fn run_combinations(
            fitter: &CurveFitter<'_, '_>,
            combinations: &[Combination],
            initial: &[f64],
            coefficients: &Coefficients,
            bounds: &Bounds,
            config: &FitConfig,
            results: &Mutex<HashMap<Combination, FitOutcome>>,
            sink: &dyn MessageSink,
        ) {
            std::thread::scope(|scope| {
                for combination in combinations {
                    scope.spawn(move || {
                        fit_one(
                            fitter,
                            combination,
                            initial,
                            coefficients,
                            bounds,
                            config,
                            results,
                            sink,
                        )
                    });
                }
            });
        }
    } else {
        #[allow(clippy::too_many_arguments)]
        fn run_combinations(
            fitter: &CurveFitter<'_, '_>,
            combinations: &[Combination],
            initial: &[f64],
            coefficients: &Coefficients,
            bounds: &Bounds,
            config: &FitConfig,
            results: &Mutex<HashMap<Combination, FitOutcome>>,
            sink: &dyn MessageSink,
        ) {
            for combination in combinations {
                fit_one(
                    fitter,
                    combination,
                    initial,
                    coefficients,
                    bounds,
                    config,
                    results,
                    sink,
                );
            }
        }
    }
}

/// Fit every combination independently and keep the lowest-RMSE result.
///
/// Each combination runs on its own worker thread; the shared results map is
/// locked only for the insert after a fit completes, never during the fit
/// itself. Per-combination failures are logged and excluded without aborting
/// their siblings. Returns [`SearchError::NoResult`] only when every single
/// combination failed.
pub fn search_best(
    args: &FitArgs<'_, '_>,
    combinations: &[Combination],
    initial: &[f64],
    coefficients: &Coefficients,
    bounds: &Bounds,
    config: &FitConfig,
    sink: &dyn MessageSink,
) -> Result<BestFit, SearchError> {
    log::debug!(
        "searching {} combinations over {} samples",
        combinations.len(),
        args.len()
    );
    let results: Mutex<HashMap<Combination, FitOutcome>> = Mutex::new(HashMap::new());
    let fitter = CurveFitter::new(args.borrow());

    run_combinations(
        &fitter,
        combinations,
        initial,
        coefficients,
        bounds,
        config,
        &results,
        sink,
    );

    let results = results.into_inner().unwrap();
    if results.is_empty() {
        log::error!("no combination produced a usable fit");
        return Err(SearchError::NoResult);
    }

    let (combination, outcome) = results
        .into_iter()
        .min_by(|(ca, a), (cb, b)| a.rmse.total_cmp(&b.rmse).then_with(|| ca.cmp(cb)))
        .unwrap();
    log::info!(
        "best combination {combination} with RMSE {:.6}",
        outcome.rmse
    );
    Ok(BestFit {
        combination,
        params: outcome.params,
        rmse: outcome.rmse,
    })
}

/// Convenience entry point taking raw sample arrays and an evaluation budget.
#[allow(clippy::too_many_arguments)]
pub fn compute_best_peaks(
    x: &[f64],
    y: &[f64],
    initial: &[f64],
    max_evaluations: usize,
    coefficients: &Coefficients,
    combinations: &[Combination],
    bounds: &Bounds,
    sink: &dyn MessageSink,
) -> Result<BestFit, SearchError> {
    let args = FitArgs::from((x, y));
    let config = FitConfig::default().max_evaluations(max_evaluations);
    search_best(&args, combinations, initial, coefficients, bounds, &config, sink)
}
