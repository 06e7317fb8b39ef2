//! A minimal column-oriented table of text cells, the in-memory form of a
//! loaded measurement file.
//!
//! The surrounding application owns parsing files into a [`DataTable`]; this
//! crate only needs named columns that can be read back as numbers, and a way
//! to attach computed columns (derivatives, reconstructed peak curves) to the
//! same table.
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// All the ways reading from or writing to a [`DataTable`] can fail
#[derive(Debug, Clone, Error)]
pub enum TableError {
    #[error("no column named '{0}'")]
    ColumnNotFound(String),
    #[error("column '{column}' contains non-numeric value '{value}' at row {row}")]
    NonNumericData {
        column: String,
        row: usize,
        value: String,
    },
    #[error("column '{column}' has {got} rows but the table has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        got: usize,
    },
}

/// An ordered collection of named columns holding text cells.
///
/// Cells are kept as text so that a column of mixed or malformed input can be
/// carried around and displayed, with the numeric interpretation deferred to
/// [`DataTable::numeric_column`] where failure is reported per-cell.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataTable {
    columns: Vec<(String, Vec<String>)>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of rows, taken from the first column
    pub fn len(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Borrow the raw text cells of a column
    pub fn column(&self, name: &str) -> Result<&[String], TableError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cells)| cells.as_slice())
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    /// Read a column back as `f64` values.
    ///
    /// The first cell that does not parse as a number aborts the read with
    /// [`TableError::NonNumericData`] naming the offending cell.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, TableError> {
        let cells = self.column(name)?;
        let mut values = Vec::with_capacity(cells.len());
        for (row, cell) in cells.iter().enumerate() {
            match cell.trim().parse::<f64>() {
                Ok(v) => values.push(v),
                Err(_) => {
                    return Err(TableError::NonNumericData {
                        column: name.to_string(),
                        row,
                        value: cell.clone(),
                    })
                }
            }
        }
        Ok(values)
    }

    /// Insert or replace a column of text cells.
    ///
    /// Any column added to a non-empty table must match the table's row count.
    pub fn set_column(&mut self, name: &str, cells: Vec<String>) -> Result<(), TableError> {
        if !self.is_empty() && cells.len() != self.len() {
            return Err(TableError::LengthMismatch {
                column: name.to_string(),
                expected: self.len(),
                got: cells.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = cells,
            None => self.columns.push((name.to_string(), cells)),
        }
        Ok(())
    }

    /// Insert or replace a column of numbers, stored in their shortest
    /// round-trippable text form.
    pub fn set_numeric_column(&mut self, name: &str, values: &[f64]) -> Result<(), TableError> {
        self.set_column(name, values.iter().map(|v| v.to_string()).collect())
    }
}

impl fmt::Display for DataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.column_names().collect();
        write!(f, "DataTable[{} rows: {}]", self.len(), names.join(", "))
    }
}
