// VDX Server - Network server for VDX time-series queries
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for VDX Server
//!
//! Loaded from a JSON file:
//!
//! ```json
//! {
//!   "port": 16050,
//!   "max_connections": 64,
//!   "read_timeout_secs": 600,
//!   "metrics_port": 9100,
//!   "store": { "prefix": "/var/lib/vdx" },
//!   "sources": [
//!     { "name": "tilt", "description": "Tilt", "type": "tilt", "maxrows": 100000 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vdx::SourceConfig;

use crate::error::{Result, ServerError};

/// Default protocol port
pub const DEFAULT_PORT: u16 = 16050;

/// Store-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one sub-directory per database
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,
}

fn default_prefix() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Server-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub address: String,
    /// Protocol port (0 picks a free port)
    pub port: u16,
    /// Concurrent connection cap
    pub max_connections: usize,
    /// Idle read timeout per connection, 0 for none
    pub read_timeout_secs: u64,
    /// Longest accepted command line
    pub max_line_bytes: usize,
    /// zstd level for binary replies
    pub compression_level: i32,
    /// Port of the Prometheus endpoint, none to disable it
    pub metrics_port: Option<u16>,
    /// Store settings
    pub store: StoreConfig,
    /// Configured sources
    pub sources: Vec<SourceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 64,
            read_timeout_secs: 0,
            max_line_bytes: 8192,
            compression_level: vdx::encoder::DEFAULT_COMPRESSION_LEVEL,
            metrics_port: None,
            store: StoreConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parse from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ServerError::InvalidConfig(
                "max_line_bytes must be at least 1".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(ServerError::InvalidConfig("source with empty name".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ServerError::InvalidConfig(format!(
                    "duplicate source '{}'",
                    source.name
                )));
            }
        }
        Ok(())
    }

    /// Idle read timeout, if any
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    /// `address:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
