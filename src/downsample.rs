// VDX - Volcano Data Exchange
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Downsampling of resolved time series
//!
//! Always applied to a series that already went through rank resolution,
//! so a bucket never blends data of different authority.

use std::fmt;
use std::str::FromStr;

use crate::matrix::{Column, ColumnKind, DataMatrix, INT_NO_DATA};

/// Downsampling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownsamplingType {
    /// Pass rows through
    #[default]
    None,
    /// Keep every n-th row
    Decimate,
    /// Average fixed-width time buckets
    Mean,
}

impl DownsamplingType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DownsamplingType::None => "NONE",
            DownsamplingType::Decimate => "DECIMATE",
            DownsamplingType::Mean => "MEAN",
        }
    }
}

impl fmt::Display for DownsamplingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownsamplingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(DownsamplingType::None),
            "DECIMATE" => Ok(DownsamplingType::Decimate),
            "MEAN" => Ok(DownsamplingType::Mean),
            other => Err(format!("expected NONE, DECIMATE or MEAN, got '{}'", other)),
        }
    }
}

/// A downsampling strategy with its argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Downsampling {
    /// Pass rows through
    #[default]
    None,
    /// Keep rows 0, n, 2n, ...
    Decimate(u32),
    /// Buckets of this many seconds
    Mean(u32),
}

impl Downsampling {
    /// Build from a type and `dsInt`; the argument must be positive for
    /// everything but `None`
    pub fn new(kind: DownsamplingType, interval: u32) -> Result<Self, String> {
        match kind {
            DownsamplingType::None => Ok(Downsampling::None),
            _ if interval == 0 => Err(format!("{} requires a positive dsInt", kind)),
            DownsamplingType::Decimate => Ok(Downsampling::Decimate(interval)),
            DownsamplingType::Mean => Ok(Downsampling::Mean(interval)),
        }
    }

    /// Strategy type
    pub fn kind(&self) -> DownsamplingType {
        match self {
            Downsampling::None => DownsamplingType::None,
            Downsampling::Decimate(_) => DownsamplingType::Decimate,
            Downsampling::Mean(_) => DownsamplingType::Mean,
        }
    }

    /// Bucket width, when the strategy groups by time
    pub fn bucket_width(&self) -> Option<f64> {
        match self {
            Downsampling::Mean(width) => Some(f64::from(*width)),
            _ => None,
        }
    }

    /// Row count after downsampling `grouped_rows` rows
    ///
    /// For `Mean` the input must already be the bucket count.
    pub fn estimate(&self, grouped_rows: usize) -> usize {
        match self {
            Downsampling::Decimate(n) => grouped_rows.div_ceil(*n as usize),
            Downsampling::None | Downsampling::Mean(_) => grouped_rows,
        }
    }

    /// Apply to a time-ordered matrix
    pub fn apply(&self, matrix: DataMatrix) -> DataMatrix {
        match self {
            Downsampling::None => matrix,
            Downsampling::Decimate(n) => decimate(&matrix, *n as usize),
            Downsampling::Mean(width) => mean(&matrix, f64::from(*width)),
        }
    }
}

/// Bucket key of a time for a bucket width
pub fn bucket_key(time: f64, width: f64) -> i64 {
    (time / width).floor() as i64
}

fn decimate(matrix: &DataMatrix, stride: usize) -> DataMatrix {
    let mut out = DataMatrix::with_capacity(matrix.columns().to_vec(), matrix.rows() / stride + 1);
    for row in matrix.iter_rows().step_by(stride) {
        out.push_row(row);
    }
    out
}

fn mean(matrix: &DataMatrix, width: f64) -> DataMatrix {
    let columns = matrix.columns().to_vec();
    let mut out = DataMatrix::new(columns.clone());
    if matrix.is_empty() || columns.is_empty() {
        return out;
    }

    let mut bucket = MeanBucket::new(&columns);
    let mut current: Option<i64> = None;
    for row in matrix.iter_rows() {
        let key = bucket_key(row[0], width);
        if current != Some(key) {
            if current.is_some() {
                out.push_row(&bucket.finish());
            }
            current = Some(key);
        }
        bucket.add(row);
    }
    if current.is_some() {
        out.push_row(&bucket.finish());
    }
    out
}

/// Running aggregate of one bucket
struct MeanBucket<'a> {
    columns: &'a [Column],
    sums: Vec<f64>,
    counts: Vec<usize>,
    /// First integer value seen per column, `None` once values disagree
    uniform: Vec<Option<f64>>,
    rows: usize,
}

impl<'a> MeanBucket<'a> {
    fn new(columns: &'a [Column]) -> Self {
        let n = columns.len();
        Self {
            columns,
            sums: vec![0.0; n],
            counts: vec![0; n],
            uniform: vec![None; n],
            rows: 0,
        }
    }

    fn add(&mut self, row: &[f64]) {
        for (i, &value) in row.iter().enumerate() {
            // time is averaged like a float column
            let kind = if i == 0 {
                ColumnKind::Float
            } else {
                self.columns[i].kind
            };
            match kind {
                ColumnKind::Float => {
                    if !value.is_nan() {
                        self.sums[i] += value;
                        self.counts[i] += 1;
                    }
                }
                ColumnKind::Integer => {
                    if self.rows == 0 {
                        self.uniform[i] = Some(value);
                    } else if self.uniform[i] != Some(value) {
                        self.uniform[i] = None;
                    }
                }
            }
        }
        self.rows += 1;
    }

    /// Emit the bucket row and reset
    fn finish(&mut self) -> Vec<f64> {
        let row = (0..self.columns.len())
            .map(|i| {
                let kind = if i == 0 {
                    ColumnKind::Float
                } else {
                    self.columns[i].kind
                };
                match kind {
                    ColumnKind::Float if self.counts[i] == 0 => f64::NAN,
                    ColumnKind::Float => self.sums[i] / self.counts[i] as f64,
                    ColumnKind::Integer => self.uniform[i].unwrap_or(INT_NO_DATA),
                }
            })
            .collect();

        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.uniform.iter_mut().for_each(|u| *u = None);
        self.rows = 0;
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Column, NO_DATA};
    use approx::assert_relative_eq;

    fn series(times: &[f64]) -> DataMatrix {
        let mut m = DataMatrix::new(vec![
            Column::float("time"),
            Column::integer("rank"),
            Column::float("value"),
        ]);
        for &t in times {
            m.push_row(&[t, 1.0, t * 2.0]);
        }
        m
    }

    #[test]
    fn test_parse_type() {
        assert_eq!("mean".parse::<DownsamplingType>(), Ok(DownsamplingType::Mean));
        assert_eq!("NONE".parse::<DownsamplingType>(), Ok(DownsamplingType::None));
        assert_eq!(
            "Decimate".parse::<DownsamplingType>(),
            Ok(DownsamplingType::Decimate)
        );
        assert!("median".parse::<DownsamplingType>().is_err());
    }

    #[test]
    fn test_requires_positive_interval() {
        assert!(Downsampling::new(DownsamplingType::Mean, 0).is_err());
        assert_eq!(
            Downsampling::new(DownsamplingType::None, 0),
            Ok(Downsampling::None)
        );
        assert_eq!(
            Downsampling::new(DownsamplingType::Mean, 60),
            Ok(Downsampling::Mean(60))
        );
    }

    #[test]
    fn test_none_passes_through() {
        let m = series(&[1.0, 2.0, 3.0]);
        assert_eq!(Downsampling::None.apply(m.clone()), m);
    }

    #[test]
    fn test_decimate() {
        let m = series(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let out = Downsampling::Decimate(2).apply(m);
        assert_eq!(out.times(), vec![0.0, 2.0, 4.0]);
        assert_eq!(Downsampling::Decimate(2).estimate(5), 3);
    }

    #[test]
    fn test_mean_buckets() {
        let m = series(&[0.0, 10.0, 20.0, 60.0, 70.0, 125.0]);
        let out = Downsampling::Mean(60).apply(m);
        assert_eq!(out.rows(), 3);
        assert_relative_eq!(out.get(0, 0), 10.0);
        assert_relative_eq!(out.get(0, 2), 20.0);
        assert_relative_eq!(out.get(1, 0), 65.0);
        assert_relative_eq!(out.get(2, 0), 125.0);
        assert_eq!(out.get(0, 1), 1.0);
        assert!(out.is_time_ordered());
    }

    #[test]
    fn test_mean_excludes_nulls() {
        let mut m = DataMatrix::new(vec![Column::float("time"), Column::float("v")]);
        m.push_row(&[0.0, 4.0]);
        m.push_row(&[1.0, NO_DATA]);
        m.push_row(&[100.0, NO_DATA]);
        let out = Downsampling::Mean(60).apply(m);
        assert_relative_eq!(out.get(0, 1), 4.0);
        assert!(out.get(1, 1).is_nan());
    }

    #[test]
    fn test_mean_mixed_integer_column() {
        let mut m = DataMatrix::new(vec![Column::float("time"), Column::integer("rank")]);
        m.push_row(&[0.0, 1.0]);
        m.push_row(&[1.0, 2.0]);
        let out = Downsampling::Mean(60).apply(m);
        assert_eq!(out.get(0, 1), INT_NO_DATA);
    }

    #[test]
    fn test_mean_negative_times() {
        let m = series(&[-90.0, -30.0, 30.0]);
        let out = Downsampling::Mean(60).apply(m);
        // buckets [-120,-60), [-60,0), [0,60)
        assert_eq!(out.rows(), 3);
    }

    #[test]
    fn test_mean_idempotent_for_same_or_dividing_width() {
        let times: Vec<f64> = (0..5000).map(|i| i as f64 * 7.3).collect();
        let once = Downsampling::Mean(600).apply(series(&times));
        let again = Downsampling::Mean(600).apply(once.clone());
        assert_eq!(once.rows(), again.rows());
        let finer = Downsampling::Mean(300).apply(once.clone());
        assert_eq!(once.rows(), finer.rows());
    }

    #[test]
    fn test_empty_input() {
        let m = series(&[]);
        assert!(Downsampling::Mean(10).apply(m.clone()).is_empty());
        assert!(Downsampling::Decimate(3).apply(m).is_empty());
    }
}
