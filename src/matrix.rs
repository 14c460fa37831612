//! Named-column numeric matrix
//!
//! [`DataMatrix`] is the unit every query path produces and the codec
//! serializes. Cells are `f64`; missing values use [`NO_DATA`] in float
//! columns and [`INT_NO_DATA`] in integer-valued columns. Column 0 is the
//! time column by convention.

use std::fmt;

use crate::error::DecodeError;

/// Missing value in a float column
pub const NO_DATA: f64 = f64::NAN;

/// Missing value in an integer-valued column (`i32::MIN`)
pub const INT_NO_DATA: f64 = -2_147_483_648.0;

/// Name of the leading time column
pub const TIME_COLUMN: &str = "time";

/// Name of the resolved-rank column
pub const RANK_COLUMN: &str = "rank";

/// Returns true if `value` is either sentinel
pub fn is_no_data(value: f64) -> bool {
    value.is_nan() || value == INT_NO_DATA
}

/// How the values of a column are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnKind {
    /// Continuous measurement, averaged when downsampling
    #[default]
    Float,
    /// Identifier or count, never averaged
    Integer,
}

impl ColumnKind {
    /// Sentinel used for missing cells of this kind
    pub fn no_data(&self) -> f64 {
        match self {
            ColumnKind::Float => NO_DATA,
            ColumnKind::Integer => INT_NO_DATA,
        }
    }
}

/// A named matrix column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Column name, as announced in the `columns=` header
    pub name: String,
    /// Interpretation of the cells
    pub kind: ColumnKind,
}

impl Column {
    /// Float column
    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Float,
        }
    }

    /// Integer-valued column
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Integer,
        }
    }
}

/// Row-major `rows x cols` matrix of `f64`
#[derive(Debug, Clone)]
pub struct DataMatrix {
    columns: Vec<Column>,
    rows: usize,
    cells: Vec<f64>,
}

impl DataMatrix {
    /// Empty matrix with the given columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: 0,
            cells: Vec::new(),
        }
    }

    /// Empty matrix with capacity for `rows` rows
    pub fn with_capacity(columns: Vec<Column>, rows: usize) -> Self {
        let cols = columns.len();
        Self {
            columns,
            rows: 0,
            cells: Vec::with_capacity(rows * cols),
        }
    }

    /// Build from row-major cells; `cells.len()` must be a multiple of the
    /// column count
    pub fn from_cells(columns: Vec<Column>, cells: Vec<f64>) -> Result<Self, DecodeError> {
        let cols = columns.len();
        if cols == 0 {
            if !cells.is_empty() {
                return Err(DecodeError::MalformedMatrix {
                    offset: 0,
                    reason: "cells without columns".to_string(),
                });
            }
            return Ok(Self::new(columns));
        }
        if cells.len() % cols != 0 {
            return Err(DecodeError::MalformedMatrix {
                offset: 0,
                reason: format!("{} cells do not fill {} columns", cells.len(), cols),
            });
        }
        Ok(Self {
            rows: cells.len() / cols,
            columns,
            cells,
        })
    }

    /// Build with anonymous float columns `c0..cN`
    pub(crate) fn anonymous(rows: usize, cols: usize, cells: Vec<f64>) -> Result<Self, DecodeError> {
        let columns: Vec<Column> = (0..cols).map(|i| Column::float(format!("c{}", i))).collect();
        if cols == 0 {
            // zero-width matrices still carry a row count on the wire
            return Ok(Self {
                columns,
                rows,
                cells: Vec::new(),
            });
        }
        Self::from_cells(columns, cells)
    }

    /// Replace column metadata, keeping the cells
    pub fn with_columns(mut self, columns: Vec<Column>) -> Result<Self, DecodeError> {
        if columns.len() != self.columns.len() {
            return Err(DecodeError::ColumnMismatch {
                expected: self.columns.len(),
                actual: columns.len(),
            });
        }
        self.columns = columns;
        Ok(self)
    }

    /// Rename columns, keeping their kinds
    pub fn with_column_names<S: AsRef<str>>(self, names: &[S]) -> Result<Self, DecodeError> {
        if names.len() != self.columns.len() {
            return Err(DecodeError::ColumnMismatch {
                expected: self.columns.len(),
                actual: names.len(),
            });
        }
        let columns = self
            .columns
            .iter()
            .zip(names)
            .map(|(c, n)| Column {
                name: n.as_ref().to_string(),
                kind: c.kind,
            })
            .collect();
        self.with_columns(columns)
    }

    /// Append a row; panics if the width is wrong
    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "row width must equal column count"
        );
        self.cells.extend_from_slice(row);
        self.rows += 1;
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    /// Check if the matrix has no rows
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Column metadata
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Index of a named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Row slice
    pub fn row(&self, index: usize) -> &[f64] {
        let cols = self.cols();
        &self.cells[index * cols..(index + 1) * cols]
    }

    /// Iterate rows in order
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on 0
        self.cells.chunks_exact(self.cols().max(1))
    }

    /// Cell value
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[row * self.cols() + col]
    }

    /// Cells of one column, top to bottom
    pub fn column_values(&self, col: usize) -> Vec<f64> {
        self.iter_rows().map(|r| r[col]).collect()
    }

    /// Values of the time column
    pub fn times(&self) -> Vec<f64> {
        if self.cols() == 0 {
            return Vec::new();
        }
        self.column_values(0)
    }

    /// Row-major cells
    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    /// True if rows are in ascending time order
    pub fn is_time_ordered(&self) -> bool {
        let times = self.times();
        times.windows(2).all(|w| w[0] <= w[1])
    }
}

impl PartialEq for DataMatrix {
    /// Bit-exact cell comparison so sentinels compare equal
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.rows == other.rows
            && self.cells.len() == other.cells.len()
            && self
                .cells
                .iter()
                .zip(&other.cells)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl fmt::Display for DataMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        write!(f, "{} x {} [{}]", self.rows, self.cols(), names.join(","))
    }
}
