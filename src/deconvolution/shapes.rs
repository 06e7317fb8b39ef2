//! The closed set of peak shape models a reaction can take, and their
//! composition into a summed multi-peak signal.
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod fraser;
mod gaussian;
mod sigmoid;

pub use fraser::FraserSuzuki;
pub use gaussian::Gaussian;
pub use sigmoid::AsymmetricDoubleSigmoid;

/// The shape family assigned to one reaction slot.
///
/// The ordering of the variants is meaningful: it is the tie-break order used
/// when two shape assignments fit equally well.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeakKind {
    #[default]
    Gauss,
    Fraser,
    Ads,
}

impl PeakKind {
    pub const ALL: [PeakKind; 3] = [PeakKind::Gauss, PeakKind::Fraser, PeakKind::Ads];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeakKind::Gauss => "gauss",
            PeakKind::Fraser => "fraser",
            PeakKind::Ads => "ads",
        }
    }
}

impl fmt::Display for PeakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeakKind {
    type Err = UnknownPeakKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauss" => Ok(PeakKind::Gauss),
            "fraser" => Ok(PeakKind::Fraser),
            "ads" => Ok(PeakKind::Ads),
            _ => Err(UnknownPeakKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown peak kind '{0}'")]
pub struct UnknownPeakKind(pub String);

/// The auxiliary shape coefficients for every reaction slot, separate from
/// the per-slot (height, center, width) triple.
///
/// Every slot carries all three entries so that a slot can switch shape
/// family without re-indexing; a Gaussian slot simply never reads them.
/// The flattened layout is `[a..., s1..., s2...]`.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coefficients {
    pub a: Vec<f64>,
    pub s1: Vec<f64>,
    pub s2: Vec<f64>,
}

impl Coefficients {
    pub fn new(a: Vec<f64>, s1: Vec<f64>, s2: Vec<f64>) -> Self {
        assert!(
            a.len() == s1.len() && s1.len() == s2.len(),
            "coefficient arrays must agree in length ({}, {}, {})",
            a.len(),
            s1.len(),
            s2.len()
        );
        Self { a, s1, s2 }
    }

    /// Split a flat `[a..., s1..., s2...]` vector into its three thirds
    pub fn from_flat(flat: &[f64]) -> Self {
        assert!(
            flat.len() % 3 == 0,
            "flattened coefficient vector length {} is not divisible by 3",
            flat.len()
        );
        let n = flat.len() / 3;
        Self {
            a: flat[..n].to_vec(),
            s1: flat[n..2 * n].to_vec(),
            s2: flat[2 * n..].to_vec(),
        }
    }

    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.a.len() * 3);
        flat.extend_from_slice(&self.a);
        flat.extend_from_slice(&self.s1);
        flat.extend_from_slice(&self.s2);
        flat
    }

    /// The number of reaction slots covered
    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

/// A dispatching peak shape model covering every supported shape family.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeakShape {
    Gaussian(Gaussian),
    FraserSuzuki(FraserSuzuki),
    AsymmetricDoubleSigmoid(AsymmetricDoubleSigmoid),
}

macro_rules! dispatch_peak {
    ($d:ident, $r:ident, $e:expr) => {
        match $d {
            PeakShape::Gaussian($r) => $e,
            PeakShape::FraserSuzuki($r) => $e,
            PeakShape::AsymmetricDoubleSigmoid($r) => $e,
        }
    };
}

impl From<Gaussian> for PeakShape {
    fn from(value: Gaussian) -> Self {
        Self::Gaussian(value)
    }
}

impl From<FraserSuzuki> for PeakShape {
    fn from(value: FraserSuzuki) -> Self {
        Self::FraserSuzuki(value)
    }
}

impl From<AsymmetricDoubleSigmoid> for PeakShape {
    fn from(value: AsymmetricDoubleSigmoid) -> Self {
        Self::AsymmetricDoubleSigmoid(value)
    }
}

impl PeakShape {
    /// Build the concrete shape for one reaction slot from its primary
    /// parameter triple and the slot's entry in the coefficient table.
    pub fn from_slot(
        kind: PeakKind,
        height: f64,
        center: f64,
        width: f64,
        coefficients: &Coefficients,
        slot: usize,
    ) -> Self {
        match kind {
            PeakKind::Gauss => Gaussian::new(height, center, width).into(),
            PeakKind::Fraser => {
                FraserSuzuki::new(height, center, width, coefficients.a[slot]).into()
            }
            PeakKind::Ads => AsymmetricDoubleSigmoid::new(
                height,
                center,
                width,
                coefficients.s1[slot],
                coefficients.s2[slot],
            )
            .into(),
        }
    }

    pub fn kind(&self) -> PeakKind {
        match self {
            PeakShape::Gaussian(_) => PeakKind::Gauss,
            PeakShape::FraserSuzuki(_) => PeakKind::Fraser,
            PeakShape::AsymmetricDoubleSigmoid(_) => PeakKind::Ads,
        }
    }

    /// Compute the theoretical signal magnitude at a specified coordinate
    pub fn density(&self, x: f64) -> f64 {
        dispatch_peak!(self, p, p.density(x))
    }

    /// Given a coordinate sequence, produce the complementary sequence of
    /// theoretical magnitudes
    pub fn predict(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.density(*x)).collect()
    }
}

/// The summed signal of one peak shape per reaction slot.
///
/// This is the function the curve fitter optimizes: each slot contributes
/// its shape evaluated from three consecutive entries of a flat parameter
/// vector, and the slot outputs are added elementwise.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiPeakModel {
    shapes: Vec<PeakShape>,
}

impl MultiPeakModel {
    pub fn new(shapes: Vec<PeakShape>) -> Self {
        Self { shapes }
    }

    /// Assemble one shape per slot from `kinds`, taking `(height, center,
    /// width)` from consecutive triples of `params` and the auxiliary
    /// coefficients from the slot's entries in `coefficients`.
    pub fn assemble(kinds: &[PeakKind], params: &[f64], coefficients: &Coefficients) -> Self {
        assert_eq!(
            params.len(),
            kinds.len() * 3,
            "expected 3 parameters per slot ({} slots), got {}",
            kinds.len(),
            params.len()
        );
        assert!(
            coefficients.len() >= kinds.len(),
            "coefficient table covers {} slots, need {}",
            coefficients.len(),
            kinds.len()
        );
        let shapes = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                PeakShape::from_slot(
                    *kind,
                    params[3 * i],
                    params[3 * i + 1],
                    params[3 * i + 2],
                    coefficients,
                    i,
                )
            })
            .collect();
        Self { shapes }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PeakShape> {
        self.shapes.iter()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn density(&self, x: f64) -> f64 {
        self.iter().map(|p| p.density(x)).sum()
    }

    pub fn predict(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.density(*x)).collect()
    }
}

impl Extend<PeakShape> for MultiPeakModel {
    fn extend<T: IntoIterator<Item = PeakShape>>(&mut self, iter: T) {
        self.shapes.extend(iter)
    }
}

impl IntoIterator for MultiPeakModel {
    type Item = PeakShape;

    type IntoIter = std::vec::IntoIter<PeakShape>;

    fn into_iter(self) -> Self::IntoIter {
        self.shapes.into_iter()
    }
}
