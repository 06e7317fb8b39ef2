//! Peak deconvolution of thermal analysis curves.
//!
//! A measured decomposition signal is modeled as the sum of one parametric
//! peak per reaction, where each peak can take one of several shape families:
//!
//! - [`Gaussian`]
//! - [`FraserSuzuki`]
//! - [`AsymmetricDoubleSigmoid`]
//!
//! Deconvolution proceeds in three nested layers. The innermost
//! [`CurveFitter`] runs one bounded least-squares fit for a *fixed*
//! assignment of shape families to reactions. Above it, [`search_best`]
//! enumerates every allowed assignment ([`Combination`]) and fits them all
//! concurrently, keeping the lowest-RMSE winner. At the top,
//! [`CoefficientOptimizer`] tunes the auxiliary shape coefficients
//! (Fraser-Suzuki skew, sigmoid slopes) by re-running the whole search as
//! the objective of a derivative-free outer loop.
//!
//! # Example
//!
//! ```rust
//! use tasignal::arrayops::gridspace;
//! use tasignal::deconvolution::{
//!     compute_best_peaks, enumerate_uniform, Bounds, Coefficients, Gaussian, NullSink, PeakKind,
//! };
//!
//! let x = gridspace(0.0, 10.0, 0.02);
//! let truth = Gaussian::new(1.0, 4.0, 0.6);
//! let y = truth.predict(&x);
//!
//! let best = compute_best_peaks(
//!     &x,
//!     &y,
//!     &[0.9, 4.2, 0.7],
//!     10_000,
//!     &Coefficients::new(vec![-1.0], vec![1.0], vec![1.0]),
//!     &enumerate_uniform(&[PeakKind::Gauss], 1),
//!     &Bounds::new(vec![0.0, 0.0, 0.05], vec![5.0, 10.0, 5.0]),
//!     &NullSink,
//! )
//! .unwrap();
//! assert!(best.rmse < 1e-3);
//! ```
mod data;
mod fitter;
mod hooks;
mod optimizer;
mod search;
mod shapes;

pub use data::{FitArgs, FitArgsIter};
pub use fitter::{
    Bounds, CurveFitter, FitConfig, FitError, FitOutcome, HeightPolicy,
};
pub use hooks::{MemorySink, MessageSink, NullSink, RefreshHook};
pub use optimizer::{
    CancellationToken, CoefficientOptimizer, DeStrategy, DifferentialEvolution, OptimizeError,
    OptimizerStrategy, ProjectedGradient, UnknownStrategy,
};
pub use search::{
    compute_best_peaks, enumerate_combinations, enumerate_uniform, search_best, BestFit,
    Combination, SearchError,
};
pub use shapes::{
    AsymmetricDoubleSigmoid, Coefficients, FraserSuzuki, Gaussian, MultiPeakModel, PeakKind,
    PeakShape, UnknownPeakKind,
};

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    use super::*;
    use crate::arrayops::gridspace;
    use crate::dataset::{Dataset, ReactionPeak};
    use crate::table::DataTable;

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    /// 500 samples of a two-peak gaussian mixture with a little measurement
    /// noise on top
    #[rstest::fixture]
    fn noisy_mixture() -> (Vec<f64>, Vec<f64>, [f64; 6]) {
        let truth = [1.0, 3.0, 0.5, 0.7, 7.0, 0.8];
        let x = gridspace(0.0, 10.0, 0.02);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1234);
        let noise = Normal::new(0.0, 0.01).unwrap();
        let first = Gaussian::new(truth[0], truth[1], truth[2]);
        let second = Gaussian::new(truth[3], truth[4], truth[5]);
        let y: Vec<f64> = x
            .iter()
            .map(|t| first.density(*t) + second.density(*t) + noise.sample(&mut rng))
            .collect();
        (x, y, truth)
    }

    #[rstest::rstest]
    #[test_log::test]
    fn test_fit_recovers_noisy_ground_truth(noisy_mixture: (Vec<f64>, Vec<f64>, [f64; 6])) {
        let (x, y, truth) = noisy_mixture;
        // initial guesses sit within ±20 % of the truth
        let initial = [0.85, 3.3, 0.58, 0.8, 6.5, 0.7];
        let bounds = Bounds::new(
            vec![0.0, 0.0, 0.05, 0.0, 0.0, 0.05],
            vec![5.0, 10.0, 5.0, 5.0, 10.0, 5.0],
        );
        let coefficients = Coefficients::new(vec![-1.0; 2], vec![1.0; 2], vec![1.0; 2]);

        let fitter = CurveFitter::new((x.as_slice(), y.as_slice()).into());
        let outcome = fitter
            .fit(
                &[PeakKind::Gauss, PeakKind::Gauss],
                &initial,
                &coefficients,
                &bounds,
                &FitConfig::default().max_evaluations(20_000),
            )
            .unwrap();

        assert!(outcome.rmse < 0.05, "rmse {}", outcome.rmse);
        for (i, expected) in truth.iter().enumerate() {
            let relative = (outcome.params[i] - expected).abs() / expected;
            assert!(
                relative < 0.05,
                "parameter {i}: fitted {} vs true {expected} ({relative:.3} relative)",
                outcome.params[i]
            );
        }
    }

    #[rstest::rstest]
    #[test_log::test]
    fn test_search_prefers_the_generating_shape(noisy_mixture: (Vec<f64>, Vec<f64>, [f64; 6])) {
        let (x, y, _truth) = noisy_mixture;
        let initial = [0.85, 3.3, 0.58, 0.8, 6.5, 0.7];
        let coefficients = Coefficients::new(vec![-0.3; 2], vec![1.0; 2], vec![1.0; 2]);
        let sink = MemorySink::new();

        let best = compute_best_peaks(
            &x,
            &y,
            &initial,
            20_000,
            &coefficients,
            &enumerate_uniform(&PeakKind::ALL, 2),
            &Bounds::new(
                vec![0.0, 2.0, 0.05, 0.0, 6.0, 0.05],
                vec![5.0, 4.0, 5.0, 5.0, 8.0, 5.0],
            ),
            &sink,
        )
        .unwrap();

        assert!(best.rmse < 0.05, "rmse {}", best.rmse);
        assert!(!sink.is_empty());
    }

    #[rstest::fixture]
    fn optimizer_dataset() -> Dataset {
        let x = gridspace(0.0, 10.0, 0.05);
        let truth = Gaussian::new(1.0, 5.0, 0.8);
        let y = truth.predict(&x);

        let mut data = DataTable::new();
        data.set_numeric_column("temperature", &x).unwrap();
        data.set_numeric_column("mass", &y).unwrap();

        let mut dataset = Dataset::new(data);
        dataset
            .peaks
            .push(ReactionPeak::new("Reaction_1", 0.9, 5.2, 0.7));
        dataset.options.max_evaluations = 5_000;
        dataset.options.evolution = DifferentialEvolution::default()
            .seed(11)
            .population(2)
            .max_iterations(2);
        dataset
    }

    #[rstest::rstest]
    #[test_log::test]
    fn test_coefficient_optimizer_end_to_end(optimizer_dataset: Dataset) {
        let dataset = Mutex::new(optimizer_dataset);
        let sink = MemorySink::new();
        let optimizer =
            CoefficientOptimizer::new(&dataset, "temperature", "mass", &sink, &NullSink);

        let coefficients = optimizer.optimize(&[vec![PeakKind::Gauss]]).unwrap();
        assert_eq!(coefficients.len(), 3);

        let dataset = dataset.lock().unwrap();
        let row = &dataset.peaks.rows()[0];
        assert_eq!(row.kind, PeakKind::Gauss);
        assert_is_close!(row.height, 1.0, 0.05, "height");
        assert_is_close!(row.center, 5.0, 0.05, "center");
        assert_is_close!(row.width, 0.8, 0.05, "width");

        assert!(dataset.data.has_column("mass_reaction_0"));
        assert!(dataset.data.has_column("mass_cumulative"));
        assert!(dataset.options.last_rmse.is_some());
        assert!(!sink.is_empty());
    }

    #[rstest::rstest]
    #[test_log::test]
    fn test_coefficient_optimizer_rejects_mismatched_selection(optimizer_dataset: Dataset) {
        let dataset = Mutex::new(optimizer_dataset);
        let sink = MemorySink::new();
        let optimizer =
            CoefficientOptimizer::new(&dataset, "temperature", "mass", &sink, &NullSink);
        let err = optimizer
            .optimize(&[vec![PeakKind::Gauss], vec![PeakKind::Fraser]])
            .unwrap_err();
        assert!(matches!(
            err,
            OptimizeError::SelectionMismatch {
                expected: 1,
                got: 2
            }
        ));
    }

    #[rstest::rstest]
    #[test_log::test]
    fn test_cancelled_before_start_leaves_dataset_untouched(optimizer_dataset: Dataset) {
        let dataset = Mutex::new(optimizer_dataset);
        let before = dataset.lock().unwrap().peaks.rows().to_vec();
        let sink = MemorySink::new();
        let optimizer =
            CoefficientOptimizer::new(&dataset, "temperature", "mass", &sink, &NullSink);
        optimizer.cancellation_token().cancel();

        let err = optimizer.optimize(&[vec![PeakKind::Gauss]]).unwrap_err();
        assert!(matches!(err, OptimizeError::Cancelled));
        assert_eq!(dataset.lock().unwrap().peaks.rows(), &before[..]);
    }
}
