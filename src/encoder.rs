//! Encoder module
//!
//! This module serializes [`DataMatrix`] values into the binary wire form
//! and compresses the result for transport.
//!
//! # Wire format
//!
//! ```text
//! [rows: u32 BE] [cols: u32 BE] [cell: f64 BE] * rows * cols   (row-major)
//! ```
//!
//! A matrix set repeats the triple once per sub-matrix, in declared order.

use crate::error::EncodeError;
use crate::matrix::DataMatrix;
use crate::metrics::CompressionMetrics;

/// Size of the `rows,cols` prefix in bytes
pub const HEADER_SIZE: usize = 8;

/// Size of one encoded cell in bytes
pub const CELL_SIZE: usize = 8;

/// Default zstd level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Exact size of `encode(matrix)` in bytes
pub fn encoded_size(matrix: &DataMatrix) -> usize {
    HEADER_SIZE + matrix.rows() * matrix.cols() * CELL_SIZE
}

/// Encode one matrix
pub fn encode(matrix: &DataMatrix) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(encoded_size(matrix));
    encode_into(matrix, &mut buf)?;
    Ok(buf)
}

/// Append the encoding of `matrix` to `buf`
pub fn encode_into(matrix: &DataMatrix, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    let overflow = || EncodeError::DimensionOverflow {
        rows: matrix.rows(),
        cols: matrix.cols(),
    };
    let rows = u32::try_from(matrix.rows()).map_err(|_| overflow())?;
    let cols = u32::try_from(matrix.cols()).map_err(|_| overflow())?;

    buf.reserve(encoded_size(matrix));
    buf.extend_from_slice(&rows.to_be_bytes());
    buf.extend_from_slice(&cols.to_be_bytes());
    for cell in matrix.cells() {
        // to_be_bytes keeps NaN payload bits intact
        buf.extend_from_slice(&cell.to_be_bytes());
    }
    Ok(())
}

/// Encode several matrices back to back
pub fn encode_set(matrices: &[DataMatrix]) -> Result<Vec<u8>, EncodeError> {
    let total = matrices.iter().map(encoded_size).sum();
    let mut buf = Vec::with_capacity(total);
    for matrix in matrices {
        encode_into(matrix, &mut buf)?;
    }
    Ok(buf)
}

/// Compress an encoded buffer
pub fn compress(bytes: &[u8], level: i32) -> Result<Vec<u8>, EncodeError> {
    zstd::encode_all(bytes, level).map_err(|e| EncodeError::Compression(e.to_string()))
}

/// Encoder that produces compressed wire payloads and keeps statistics
#[derive(Debug, Clone)]
pub struct Encoder {
    /// zstd compression level
    level: i32,
    /// Statistics over every payload produced
    metrics: CompressionMetrics,
}

impl Encoder {
    /// Create a new encoder with the default compression level
    pub fn new() -> Self {
        Self::with_level(DEFAULT_COMPRESSION_LEVEL)
    }

    /// Create an encoder with a specific zstd level
    pub fn with_level(level: i32) -> Self {
        Self {
            level,
            metrics: CompressionMetrics::default(),
        }
    }

    /// Compression level in use
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Encode and compress a matrix set into a transport payload
    pub fn encode_payload(&mut self, matrices: &[DataMatrix]) -> Result<Vec<u8>, EncodeError> {
        let raw = encode_set(matrices)?;
        let compressed = compress(&raw, self.level)?;
        let rows = matrices.iter().map(DataMatrix::rows).sum();
        self.metrics
            .record_payload(raw.len(), compressed.len(), matrices.len(), rows);
        Ok(compressed)
    }

    /// Statistics so far
    pub fn metrics(&self) -> &CompressionMetrics {
        &self.metrics
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Column, NO_DATA};

    fn sample() -> DataMatrix {
        let mut m = DataMatrix::new(vec![Column::float("time"), Column::float("value")]);
        m.push_row(&[1.0, 2.5]);
        m.push_row(&[2.0, NO_DATA]);
        m
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(bytes.len(), 8 + 2 * 2 * 8);
        assert_eq!(&bytes[0..4], &2u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_be_bytes());
        assert_eq!(&bytes[8..16], &1.0f64.to_be_bytes());
        assert_eq!(&bytes[16..24], &2.5f64.to_be_bytes());
        assert!(f64::from_be_bytes(bytes[32..40].try_into().unwrap()).is_nan());
    }

    #[test]
    fn test_encoded_size_matches() {
        let m = sample();
        assert_eq!(encode(&m).unwrap().len(), encoded_size(&m));
    }

    #[test]
    fn test_encode_set_concatenates() {
        let m = sample();
        let set = encode_set(&[m.clone(), m.clone()]).unwrap();
        let single = encode(&m).unwrap();
        assert_eq!(set.len(), 2 * single.len());
        assert_eq!(&set[..single.len()], single.as_slice());
    }

    #[test]
    fn test_empty_matrix() {
        let m = DataMatrix::new(vec![Column::float("time")]);
        let bytes = encode(&m).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_encoder_records_metrics() {
        let mut encoder = Encoder::new();
        let mut m = DataMatrix::new(vec![Column::float("time"), Column::float("value")]);
        for i in 0..500 {
            m.push_row(&[i as f64, 1.0]);
        }
        let payload = encoder.encode_payload(&[m]).unwrap();
        assert!(!payload.is_empty());

        let metrics = encoder.metrics();
        assert_eq!(metrics.payload_count, 1);
        assert_eq!(metrics.row_count, 500);
        assert_eq!(metrics.raw_bytes, (8 + 500 * 2 * 8) as u64);
        assert!(metrics.compression_ratio() > 1.0);
    }
}
