//! `tasignal` is a library for deconvolving thermal analysis curves into
//! a sum of parametric reaction peaks.
//!
//! A host application (table views, plots, interactive peak sketching) loads
//! measurement columns into a [`DataTable`](crate::table::DataTable) and
//! sketches candidate peaks into a
//! [`ReactionTable`](crate::dataset::ReactionTable). This crate supplies the
//! numerical machinery underneath:
//!
//! - the peak shape models and their summed multi-peak signal
//!   ([`crate::deconvolution`]),
//! - a bounded least-squares fitter for one shape assignment,
//! - an exhaustive, concurrent search over all allowed shape assignments,
//! - an outer optimizer tuning the auxiliary shape coefficients, writing
//!   every intermediate winner back into the dataset so the host can render
//!   progress live.
//!
//! # Usage
//! ```
//! use tasignal::arrayops::gridspace;
//! use tasignal::deconvolution::{
//!     compute_best_peaks, enumerate_uniform, Bounds, Coefficients, Gaussian, NullSink, PeakKind,
//! };
//!
//! // a synthetic decomposition signal with one reaction
//! let x = gridspace(0.0, 10.0, 0.02);
//! let y = Gaussian::new(1.0, 4.0, 0.6).predict(&x);
//!
//! let best = compute_best_peaks(
//!     &x,
//!     &y,
//!     &[0.9, 4.2, 0.7],
//!     10_000,
//!     &Coefficients::new(vec![-1.0], vec![1.0], vec![1.0]),
//!     &enumerate_uniform(&PeakKind::ALL, 1),
//!     &Bounds::new(vec![0.0, 0.0, 0.05], vec![5.0, 10.0, 5.0]),
//!     &NullSink,
//! )
//! .unwrap();
//! assert_eq!(best.combination.kinds(), &[PeakKind::Gauss]);
//! assert!(best.rmse < 1e-3);
//! ```
pub mod arrayops;
pub mod dataset;
pub mod deconvolution;
pub mod table;

pub use crate::dataset::{reconstruct_curves, Dataset, ReactionPeak, ReactionTable};
pub use crate::deconvolution::{
    compute_best_peaks, search_best, BestFit, CoefficientOptimizer, Combination, PeakKind,
    PeakShape, SearchError,
};
pub use crate::table::{DataTable, TableError};
