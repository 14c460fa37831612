//! Error types for VDX
//!
//! This module defines all error types used throughout the library. Every
//! per-request failure ends up as a [`VdxError`], which the server turns
//! into an `error:` response line.

use thiserror::Error;

/// Result type alias for VDX operations
pub type Result<T> = std::result::Result<T, VdxError>;

/// Main error type for VDX operations
#[derive(Error, Debug)]
pub enum VdxError {
    /// Malformed or incomplete request
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Backing store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The row-limit guard rejected the query
    #[error(
        "query would return {rows} rows, exceeding the configured limit of {limit} rows; \
         downsample (ds=MEAN;dsInt=<seconds>) or narrow the time range"
    )]
    LimitExceeded { limit: usize, rows: usize },

    /// Encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Decoding error (client side)
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Socket or file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VdxError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            VdxError::Protocol(_) => "protocol",
            VdxError::Store(_) => "store",
            VdxError::LimitExceeded { .. } => "limit",
            VdxError::Encode(_) => "encode",
            VdxError::Decode(_) => "decode",
            VdxError::Io(_) => "io",
        }
    }

    /// True when the failure was caused by the request itself
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VdxError::Protocol(_) | VdxError::LimitExceeded { .. }
        )
    }
}

/// Errors in the text framing or the request parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Empty command line
    #[error("empty command")]
    EmptyCommand,

    /// Parameter list could not be split into key=value pairs
    #[error("malformed parameter '{0}'")]
    MalformedParameter(String),

    /// No handler registered under that name
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Required parameter absent
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    /// Parameter present but unusable
    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// No source registered under that name
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    /// Action not supported by the source
    #[error("unknown action '{action}' for source '{source_name}'")]
    UnknownAction { source_name: String, action: String },

    /// Command line longer than allowed
    #[error("command line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// Response header could not be parsed (client side)
    #[error("malformed response header '{0}'")]
    MalformedHeader(String),
}

/// Errors raised by a backing store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Store could not be reached or opened
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// Database (schema) does not exist
    #[error("database '{0}' does not exist")]
    MissingDatabase(String),

    /// A query ran before `use_database`
    #[error("no database selected")]
    NoDatabaseSelected,

    /// Query failed inside the store
    #[error("query failed: {0}")]
    Query(String),

    /// Stored data could not be interpreted
    #[error("corrupt data in '{location}': {reason}")]
    Corrupt { location: String, reason: String },
}

/// Errors during encoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Matrix dimension does not fit the wire header
    #[error("Matrix too large: {rows} x {cols} exceeds u32 dimensions")]
    DimensionOverflow { rows: usize, cols: usize },

    /// Compressor failure
    #[error("Compression failed: {0}")]
    Compression(String),
}

/// Errors during decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Malformed matrix
    #[error("Malformed matrix at offset {offset}: {reason}")]
    MalformedMatrix { offset: usize, reason: String },

    /// Column names do not match the matrix width
    #[error("Column count mismatch: matrix has {expected} columns, got {actual} names")]
    ColumnMismatch { expected: usize, actual: usize },

    /// Decompressor failure
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Decompressed payload larger than allowed
    #[error("Decompressed payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VdxError::Decode(DecodeError::BufferTooShort {
            needed: 16,
            available: 3,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("too short"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn test_limit_message_is_actionable() {
        let err = VdxError::LimitExceeded {
            limit: 1000,
            rows: 1500,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("1500"));
        assert!(msg.contains("ds=MEAN"));
    }

    #[test]
    fn test_error_conversion() {
        let store_err = StoreError::NoDatabaseSelected;
        let err: VdxError = store_err.into();
        assert!(matches!(err, VdxError::Store(_)));
        assert_eq!(err.kind(), "store");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_protocol_error_is_client_error() {
        let err: VdxError = ProtocolError::MissingParameter("source").into();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "missing required parameter 'source'");
    }
}
