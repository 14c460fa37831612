// VDX Server - Network server for VDX time-series queries
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for VDX Server

use thiserror::Error;

/// Main error type for server setup and I/O
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Listener could not be bound
    #[error("Cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: std::io::Error },

    /// Socket or file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core library error
    #[error(transparent)]
    Vdx(#[from] vdx::VdxError),
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
