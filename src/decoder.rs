//! Decoder module
//!
//! This module is the exact inverse of [`crate::encoder`]: it decompresses
//! transport payloads and turns the binary wire form back into
//! [`DataMatrix`] values. Truncated or inconsistent input is rejected with
//! a [`DecodeError`]; nothing is ever read out of bounds.

use std::io::Read;

use crate::encoder::{CELL_SIZE, HEADER_SIZE};
use crate::error::DecodeError;
use crate::matrix::DataMatrix;

/// Default cap on decompressed payload size (1 GiB)
pub const MAX_DECOMPRESSED_SIZE: usize = 1 << 30;

/// Decode exactly one matrix; trailing bytes are an error
pub fn decode(bytes: &[u8]) -> Result<DataMatrix, DecodeError> {
    let (matrix, offset) = read_matrix(bytes, 0)?;
    if offset != bytes.len() {
        return Err(DecodeError::MalformedMatrix {
            offset,
            reason: format!("{} trailing bytes", bytes.len() - offset),
        });
    }
    Ok(matrix)
}

/// Decode back-to-back matrices until the buffer is exhausted
pub fn decode_set(bytes: &[u8]) -> Result<Vec<DataMatrix>, DecodeError> {
    let mut matrices = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (matrix, next) = read_matrix(bytes, offset)?;
        matrices.push(matrix);
        offset = next;
    }
    Ok(matrices)
}

/// Decompress a payload, refusing output larger than `max`
pub fn decompress(bytes: &[u8], max: usize) -> Result<Vec<u8>, DecodeError> {
    let decoder =
        zstd::stream::read::Decoder::new(bytes).map_err(|e| DecodeError::Decompression(e.to_string()))?;
    let mut out = Vec::new();
    decoder
        .take(max as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Decompression(e.to_string()))?;
    if out.len() > max {
        return Err(DecodeError::PayloadTooLarge { max });
    }
    Ok(out)
}

/// Read one `rows,cols,cells` triple starting at `offset`
///
/// Returns the matrix and the offset just past it.
fn read_matrix(bytes: &[u8], offset: usize) -> Result<(DataMatrix, usize), DecodeError> {
    let header_end = offset + HEADER_SIZE;
    if bytes.len() < header_end {
        return Err(DecodeError::BufferTooShort {
            needed: header_end,
            available: bytes.len(),
        });
    }

    let rows = read_u32(bytes, offset) as usize;
    let cols = read_u32(bytes, offset + 4) as usize;

    let body_len = rows
        .checked_mul(cols)
        .and_then(|cells| cells.checked_mul(CELL_SIZE))
        .ok_or_else(|| DecodeError::MalformedMatrix {
            offset,
            reason: format!("{} x {} overflows", rows, cols),
        })?;
    let end = header_end
        .checked_add(body_len)
        .ok_or_else(|| DecodeError::MalformedMatrix {
            offset,
            reason: "length overflows".to_string(),
        })?;
    if bytes.len() < end {
        return Err(DecodeError::BufferTooShort {
            needed: end,
            available: bytes.len(),
        });
    }

    let cells = bytes[header_end..end]
        .chunks_exact(CELL_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; CELL_SIZE];
            raw.copy_from_slice(chunk);
            f64::from_be_bytes(raw)
        })
        .collect();

    Ok((DataMatrix::anonymous(rows, cols, cells)?, end))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decoder for compressed transport payloads
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum decompressed size accepted
    max_payload: usize,
}

impl Decoder {
    /// Create a new decoder with the default size cap
    pub fn new() -> Self {
        Self {
            max_payload: MAX_DECOMPRESSED_SIZE,
        }
    }

    /// Create a decoder with a custom decompressed size cap
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Largest decompressed payload accepted
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Decompress and decode a matrix set
    pub fn decode_payload(&self, payload: &[u8]) -> Result<Vec<DataMatrix>, DecodeError> {
        let raw = decompress(payload, self.max_payload)?;
        decode_set(&raw)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{compress, encode, encode_set, DEFAULT_COMPRESSION_LEVEL};
    use crate::matrix::{Column, INT_NO_DATA, NO_DATA};

    fn sample() -> DataMatrix {
        let mut m = DataMatrix::new(vec![
            Column::float("time"),
            Column::integer("rank"),
            Column::float("value"),
        ]);
        m.push_row(&[10.0, 1.0, 0.5]);
        m.push_row(&[20.0, INT_NO_DATA, NO_DATA]);
        m
    }

    #[test]
    fn test_roundtrip_with_sentinels() {
        let m = sample();
        let decoded = decode(&encode(&m).unwrap())
            .unwrap()
            .with_columns(m.columns().to_vec())
            .unwrap();
        assert_eq!(decoded, m);
        assert!(decoded.get(1, 2).is_nan());
        assert_eq!(decoded.get(1, 1), INT_NO_DATA);
    }

    #[test]
    fn test_truncated_header() {
        let err = decode(&[0, 0, 0, 1, 0]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::BufferTooShort {
                needed: 8,
                available: 5
            }
        );
    }

    #[test]
    fn test_truncated_body() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::BufferTooShort { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            DecodeError::MalformedMatrix { .. }
        ));
    }

    #[test]
    fn test_huge_dimensions_do_not_allocate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_set() {
        let m = sample();
        let bytes = encode_set(&[m.clone(), m.clone(), m]).unwrap();
        let set = decode_set(&bytes).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.iter().all(|s| s.rows() == 2 && s.cols() == 3));
    }

    #[test]
    fn test_decode_set_truncated_tail() {
        let m = sample();
        let mut bytes = encode_set(&[m.clone(), m]).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(decode_set(&bytes).is_err());
    }

    #[test]
    fn test_zero_width_keeps_row_count() {
        let mut m = DataMatrix::new(Vec::new());
        m.push_row(&[]);
        m.push_row(&[]);
        let decoded = decode(&encode(&m).unwrap()).unwrap();
        assert_eq!(decoded.rows(), 2);
        assert_eq!(decoded.cols(), 0);
    }

    #[test]
    fn test_payload_roundtrip() {
        let m = sample();
        let raw = encode_set(&[m.clone()]).unwrap();
        let payload = compress(&raw, DEFAULT_COMPRESSION_LEVEL).unwrap();
        let set = Decoder::new().decode_payload(&payload).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].cells().len(), m.cells().len());
    }

    #[test]
    fn test_decompress_cap() {
        let raw = vec![0u8; 4096];
        let payload = compress(&raw, DEFAULT_COMPRESSION_LEVEL).unwrap();
        let err = decompress(&payload, 1024).unwrap_err();
        assert_eq!(err, DecodeError::PayloadTooLarge { max: 1024 });
    }

    #[test]
    fn test_garbage_payload() {
        let err = Decoder::new().decode_payload(b"not zstd").unwrap_err();
        assert!(matches!(err, DecodeError::Decompression(_)));
    }
}
