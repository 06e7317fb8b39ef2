//! The mutable state a deconvolution session operates on: the loaded data
//! table, the table of sketched reaction peaks, and the optimization options.
//!
//! The dataset is always passed explicitly — components never share state
//! behind the caller's back. A host that drives optimization from a worker
//! thread wraps the dataset in `Arc<Mutex<_>>` and every write happens under
//! that lock, so observers on other threads never see a half-applied fit.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::reaction_rate;
use crate::deconvolution::{
    BestFit, Coefficients, Combination, DifferentialEvolution, HeightPolicy, OptimizerStrategy,
    PeakKind, PeakShape, ProjectedGradient,
};
use crate::table::{DataTable, TableError};

/// One reaction row: a sketched or fitted peak with its shape assignment and
/// auxiliary coefficients.
///
/// Rows are only ever removed by explicit user action; every successful fit
/// mutates them in place.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReactionPeak {
    /// Unique reaction label, e.g. `"Reaction_1"`
    pub reaction: String,
    pub kind: PeakKind,
    pub height: f64,
    pub center: f64,
    pub width: f64,
    /// Fraser-Suzuki skew, read only when `kind` is [`PeakKind::Fraser`]
    pub coeff_a: f64,
    /// Sigmoid slopes, read only when `kind` is [`PeakKind::Ads`]
    pub coeff_s1: f64,
    pub coeff_s2: f64,
}

impl ReactionPeak {
    pub fn new(reaction: impl Into<String>, height: f64, center: f64, width: f64) -> Self {
        Self {
            reaction: reaction.into(),
            kind: PeakKind::default(),
            height,
            center,
            width,
            coeff_a: -1.0,
            coeff_s1: 1.0,
            coeff_s2: 1.0,
        }
    }

    /// Build a row from an interactive sketch gesture: the press point gives
    /// the apex, the horizontal release distance gives the half-width.
    pub fn from_sketch(
        reaction: impl Into<String>,
        press_x: f64,
        press_y: f64,
        release_x: f64,
    ) -> Self {
        let width = 2.0 * (release_x - press_x).abs();
        Self::new(reaction, press_y, press_x, width)
    }

    /// The concrete shape model this row currently describes
    pub fn shape(&self) -> PeakShape {
        let coefficients = Coefficients::new(
            vec![self.coeff_a],
            vec![self.coeff_s1],
            vec![self.coeff_s2],
        );
        PeakShape::from_slot(
            self.kind,
            self.height,
            self.center,
            self.width,
            &coefficients,
            0,
        )
    }
}

/// The ordered collection of reaction rows for one loaded measurement
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReactionTable {
    rows: Vec<ReactionPeak>,
}

impl ReactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ReactionPeak) {
        self.rows.push(row);
    }

    pub fn remove(&mut self, index: usize) -> ReactionPeak {
        self.rows.remove(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ReactionPeak] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [ReactionPeak] {
        &mut self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReactionPeak> {
        self.rows.iter()
    }

    /// Flatten the rows into the `(height, center, width)` triples the
    /// fitter starts from, in row order
    pub fn initial_params(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.rows.len() * 3);
        for row in &self.rows {
            params.extend_from_slice(&[row.height, row.center, row.width]);
        }
        params
    }

    /// Gather every row's auxiliary coefficients into one table
    pub fn coefficients(&self) -> Coefficients {
        Coefficients::new(
            self.rows.iter().map(|r| r.coeff_a).collect(),
            self.rows.iter().map(|r| r.coeff_s1).collect(),
            self.rows.iter().map(|r| r.coeff_s2).collect(),
        )
    }

    /// The shape assignment currently recorded on the rows
    pub fn combination(&self) -> Combination {
        self.rows.iter().map(|r| r.kind).collect()
    }

    /// Write a winning fit back into the rows: shape assignment, fitted
    /// parameters, and the coefficient values the fit was evaluated with
    pub fn apply_fit(&mut self, best: &BestFit, coefficients: &Coefficients) {
        assert_eq!(best.combination.len(), self.rows.len());
        for (i, kind) in best.combination.iter().enumerate() {
            let row = &mut self.rows[i];
            row.kind = *kind;
            row.height = best.params[3 * i];
            row.center = best.params[3 * i + 1];
            row.width = best.params[3 * i + 2];
            row.coeff_a = coefficients.a[i];
            row.coeff_s1 = coefficients.s1[i];
            row.coeff_s2 = coefficients.s2[i];
        }
    }

    /// Write final coefficients into the rows whose shape actually consumes
    /// them, leaving the others untouched
    pub fn apply_coefficients(&mut self, coefficients: &Coefficients) {
        assert!(coefficients.len() >= self.rows.len());
        for (i, row) in self.rows.iter_mut().enumerate() {
            match row.kind {
                PeakKind::Gauss => {}
                PeakKind::Fraser => row.coeff_a = coefficients.a[i],
                PeakKind::Ads => {
                    row.coeff_s1 = coefficients.s1[i];
                    row.coeff_s2 = coefficients.s2[i];
                }
            }
        }
    }
}

impl FromIterator<ReactionPeak> for ReactionTable {
    fn from_iter<T: IntoIterator<Item = ReactionPeak>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Box constraints for each coefficient family, shared by every reaction
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoefficientBounds {
    pub a: (f64, f64),
    pub s1: (f64, f64),
    pub s2: (f64, f64),
}

impl CoefficientBounds {
    /// The calibration defaults offered when no tighter boxes are known
    pub fn calibration() -> Self {
        Self {
            a: (-2.0, 2.0),
            s1: (0.1, 35.0),
            s2: (0.1, 35.0),
        }
    }

    /// Derive boxes spanning the rows' current coefficients, widened by
    /// ±20 % so the optimizer can move off the seed, falling back to the
    /// calibration defaults for an empty table
    pub fn around_current(coefficients: &Coefficients) -> Self {
        let spread = |values: &[f64], fallback: (f64, f64)| {
            if values.is_empty() {
                return fallback;
            }
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (lo - 0.2 * lo.abs().max(1.0), hi + 0.2 * hi.abs().max(1.0))
        };
        let defaults = Self::calibration();
        Self {
            a: spread(&coefficients.a, defaults.a),
            s1: spread(&coefficients.s1, defaults.s1),
            s2: spread(&coefficients.s2, defaults.s2),
        }
    }

    /// Expand into one `(lower, upper)` pair per flattened coefficient for
    /// `n` reactions, in `[a..., s1..., s2...]` layout
    pub fn flatten_for(&self, n: usize) -> Vec<(f64, f64)> {
        let mut boxes = Vec::with_capacity(n * 3);
        boxes.extend(std::iter::repeat(self.a).take(n));
        boxes.extend(std::iter::repeat(self.s1).take(n));
        boxes.extend(std::iter::repeat(self.s2).take(n));
        boxes
    }
}

impl Default for CoefficientBounds {
    fn default() -> Self {
        Self::calibration()
    }
}

/// Everything a host's options table feeds into the optimization loop
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OptimizerOptions {
    /// Residual evaluation budget for each single combination fit
    pub max_evaluations: usize,
    pub height_policy: HeightPolicy,
    pub strategy: OptimizerStrategy,
    pub evolution: DifferentialEvolution,
    pub gradient: ProjectedGradient,
    pub coefficient_bounds: CoefficientBounds,
    /// RMSE of the last accepted batch, recorded for display
    pub last_rmse: Option<f64>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 10_000,
            height_policy: HeightPolicy::default(),
            strategy: OptimizerStrategy::default(),
            evolution: DifferentialEvolution::default(),
            gradient: ProjectedGradient::default(),
            coefficient_bounds: CoefficientBounds::default(),
            last_rmse: None,
        }
    }
}

/// Reconstruct each slot's contribution over `x` plus the cumulative sum of
/// all slots.
///
/// The cumulative curve is what should overlay the observed series when the
/// fit is good.
pub fn reconstruct_curves(
    params: &[f64],
    combination: &Combination,
    x: &[f64],
    coefficients: &Coefficients,
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut per_peak = Vec::with_capacity(combination.len());
    let mut cumulative = vec![0.0; x.len()];
    for (i, kind) in combination.iter().enumerate() {
        let shape = PeakShape::from_slot(
            *kind,
            params[3 * i],
            params[3 * i + 1],
            params[3 * i + 2],
            coefficients,
            i,
        );
        let curve = shape.predict(x);
        for (total, value) in cumulative.iter_mut().zip(curve.iter()) {
            *total += value;
        }
        per_peak.push(curve);
    }
    (per_peak, cumulative)
}

/// The complete state of one deconvolution session
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dataset {
    pub data: DataTable,
    pub peaks: ReactionTable,
    pub options: OptimizerOptions,
}

impl Dataset {
    pub fn new(data: DataTable) -> Self {
        Self {
            data,
            peaks: ReactionTable::new(),
            options: OptimizerOptions::default(),
        }
    }

    /// Differentiate `y_column` against `x_column` and store the negated
    /// gradient as a new `{y_column}_diff` column, returning its name
    pub fn add_derivative_column(
        &mut self,
        x_column: &str,
        y_column: &str,
    ) -> Result<String, TableError> {
        let x = self.data.numeric_column(x_column)?;
        let y = self.data.numeric_column(y_column)?;
        if !crate::arrayops::is_increasing(&x) {
            log::warn!("column '{x_column}' is not monotonically increasing, the derivative may be meaningless");
        }
        let rate = reaction_rate(&x, &y);
        let name = format!("{y_column}_diff");
        self.data.set_numeric_column(&name, &rate)?;
        Ok(name)
    }

    /// Store a winning fit: update the reaction rows, rewrite the per-peak
    /// and cumulative reconstruction columns over `x`, and record the RMSE
    pub fn apply_best_fit(
        &mut self,
        best: &BestFit,
        coefficients: &Coefficients,
        y_column: &str,
        x: &[f64],
    ) -> Result<(), TableError> {
        self.peaks.apply_fit(best, coefficients);
        let (per_peak, cumulative) =
            reconstruct_curves(&best.params, &best.combination, x, coefficients);
        for (i, curve) in per_peak.iter().enumerate() {
            self.data
                .set_numeric_column(&format!("{y_column}_reaction_{i}"), curve)?;
        }
        self.data
            .set_numeric_column(&format!("{y_column}_cumulative"), &cumulative)?;
        self.options.last_rmse = Some(best.rmse);
        Ok(())
    }

    /// Rewrite the reconstruction columns from the rows' current state
    pub fn apply_reconstruction(&mut self, y_column: &str, x: &[f64]) -> Result<(), TableError> {
        let combination = self.peaks.combination();
        let params = self.peaks.initial_params();
        let coefficients = self.peaks.coefficients();
        let (per_peak, cumulative) = reconstruct_curves(&params, &combination, x, &coefficients);
        for (i, curve) in per_peak.iter().enumerate() {
            self.data
                .set_numeric_column(&format!("{y_column}_reaction_{i}"), curve)?;
        }
        self.data
            .set_numeric_column(&format!("{y_column}_cumulative"), &cumulative)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arrayops::gridspace;
    use crate::deconvolution::Gaussian;

    fn seeded_table() -> DataTable {
        let x = gridspace(0.0, 10.0, 0.1);
        let y: Vec<f64> = x
            .iter()
            .map(|t| Gaussian::new(1.0, 5.0, 1.0).density(*t))
            .collect();
        let mut data = DataTable::new();
        data.set_numeric_column("temperature", &x).unwrap();
        data.set_numeric_column("mass", &y).unwrap();
        data
    }

    #[test]
    fn test_initial_params_flatten_in_row_order() {
        let table: ReactionTable = [
            ReactionPeak::new("Reaction_1", 1.0, 3.0, 0.5),
            ReactionPeak::new("Reaction_2", 0.7, 7.0, 0.8),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.initial_params(), vec![1.0, 3.0, 0.5, 0.7, 7.0, 0.8]);
    }

    #[test]
    fn test_from_sketch_width_rule() {
        let peak = ReactionPeak::from_sketch("Reaction_1", 5.0, 2.0, 6.5);
        assert_eq!(peak.center, 5.0);
        assert_eq!(peak.height, 2.0);
        assert_eq!(peak.width, 3.0);
        // dragging leftwards gives the same width
        let mirrored = ReactionPeak::from_sketch("Reaction_1", 5.0, 2.0, 3.5);
        assert_eq!(mirrored.width, 3.0);
    }

    #[test]
    fn test_apply_fit_updates_rows() {
        let mut table: ReactionTable = [
            ReactionPeak::new("Reaction_1", 1.0, 3.0, 0.5),
            ReactionPeak::new("Reaction_2", 0.7, 7.0, 0.8),
        ]
        .into_iter()
        .collect();
        let best = BestFit {
            combination: vec![PeakKind::Fraser, PeakKind::Ads].into(),
            params: vec![1.1, 3.1, 0.55, 0.72, 7.05, 0.78],
            rmse: 0.01,
        };
        let coefficients =
            Coefficients::new(vec![-0.4, -0.2], vec![1.5, 2.5], vec![3.5, 4.5]);
        table.apply_fit(&best, &coefficients);

        assert_eq!(table.rows()[0].kind, PeakKind::Fraser);
        assert_eq!(table.rows()[0].height, 1.1);
        assert_eq!(table.rows()[0].coeff_a, -0.4);
        assert_eq!(table.rows()[1].kind, PeakKind::Ads);
        assert_eq!(table.rows()[1].coeff_s1, 2.5);
        assert_eq!(table.rows()[1].coeff_s2, 4.5);
    }

    #[test]
    fn test_apply_coefficients_only_touches_matching_kinds() {
        let mut table: ReactionTable = [
            ReactionPeak::new("Reaction_1", 1.0, 3.0, 0.5),
            ReactionPeak::new("Reaction_2", 0.7, 7.0, 0.8),
        ]
        .into_iter()
        .collect();
        table.rows_mut()[1].kind = PeakKind::Fraser;

        let before = table.rows()[0].clone();
        let coefficients = Coefficients::new(vec![9.0, 8.0], vec![7.0, 6.0], vec![5.0, 4.0]);
        table.apply_coefficients(&coefficients);

        // the gaussian row keeps its coefficients
        assert_eq!(table.rows()[0], before);
        // the fraser row takes only its skew
        assert_eq!(table.rows()[1].coeff_a, 8.0);
        assert_eq!(table.rows()[1].coeff_s1, 1.0);
    }

    #[test]
    fn test_around_current_spans_the_rows() {
        let coefficients = Coefficients::new(vec![-0.5, 0.5], vec![1.0, 3.0], vec![2.0, 2.0]);
        let bounds = CoefficientBounds::around_current(&coefficients);
        assert!(bounds.a.0 < -0.5 && bounds.a.1 > 0.5);
        assert!(bounds.s1.0 < 1.0 && bounds.s1.1 > 3.0);
        assert!(bounds.s2.0 < 2.0 && bounds.s2.1 > 2.0);

        let empty = CoefficientBounds::around_current(&Coefficients::default());
        assert_eq!(empty, CoefficientBounds::calibration());
    }

    #[test]
    fn test_reconstruct_cumulative_is_sum_of_peaks() {
        let x = gridspace(0.0, 10.0, 0.5);
        let combination: Combination = vec![PeakKind::Gauss, PeakKind::Gauss].into();
        let params = [1.0, 3.0, 0.5, 0.7, 7.0, 0.8];
        let coefficients = Coefficients::new(vec![0.0; 2], vec![1.0; 2], vec![1.0; 2]);
        let (per_peak, cumulative) = reconstruct_curves(&params, &combination, &x, &coefficients);
        assert_eq!(per_peak.len(), 2);
        for i in 0..x.len() {
            let total = per_peak[0][i] + per_peak[1][i];
            assert!((total - cumulative[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_add_derivative_column() {
        let mut dataset = Dataset::new(seeded_table());
        let name = dataset
            .add_derivative_column("temperature", "mass")
            .unwrap();
        assert_eq!(name, "mass_diff");
        let rate = dataset.data.numeric_column("mass_diff").unwrap();
        assert_eq!(rate.len(), dataset.data.len());
    }

    #[test]
    fn test_apply_best_fit_writes_columns_and_rmse() {
        let mut dataset = Dataset::new(seeded_table());
        dataset.peaks.push(ReactionPeak::new("Reaction_1", 1.0, 5.0, 1.0));
        let x = dataset.data.numeric_column("temperature").unwrap();
        let best = BestFit {
            combination: vec![PeakKind::Gauss].into(),
            params: vec![1.0, 5.0, 1.0],
            rmse: 0.002,
        };
        let coefficients = dataset.peaks.coefficients();
        dataset
            .apply_best_fit(&best, &coefficients, "mass", &x)
            .unwrap();

        assert!(dataset.data.has_column("mass_reaction_0"));
        assert!(dataset.data.has_column("mass_cumulative"));
        assert_eq!(dataset.options.last_rmse, Some(0.002));

        let cumulative = dataset.data.numeric_column("mass_cumulative").unwrap();
        let observed = dataset.data.numeric_column("mass").unwrap();
        for (a, b) in cumulative.iter().zip(observed.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
