// VDX Server - Network server for VDX time-series queries
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # VDX Server
//!
//! Serves VDX data sources over the line protocol:
//!
//! - [`server`]: Accept loop, connection cap and per-connection command loop
//! - [`dispatcher`]: `version`, `menu` and `getdata` handlers
//! - [`store_csv`]: CSV-backed store
//! - [`config`]: JSON configuration
//! - [`metrics`]: Prometheus metrics

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod server;
pub mod store_csv;

pub use config::{ServerConfig, StoreConfig, DEFAULT_PORT};
pub use dispatcher::{CommandHandler, Dispatcher};
pub use error::{Result, ServerError};
pub use server::{metrics_router, serve_metrics, Server};
pub use store_csv::{CsvStore, CsvStoreFactory};
