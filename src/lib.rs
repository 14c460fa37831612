//! # VDX - Volcano Data Exchange
//!
//! Core of a time-series query service: many independently schemed data
//! sources answered over a small text-framed protocol with compressed
//! binary matrices.
//!
//! ## Key Features
//!
//! - **Rank resolution**: one measurement per time key, best available or pinned
//! - **Downsampling**: NONE, DECIMATE and MEAN buckets
//! - **Row-limit guard**: fails before materializing oversized results
//! - **Source pool**: lazily built, exclusively leased store handles
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vdx::{
//!     Channel, Column, DataQuery, GetData, Measurement, MemoryDatabase, MemoryStoreFactory,
//!     Rank, SourceConfig, SourcePool, SourceReply, TimeRange,
//! };
//!
//! let factory = MemoryStoreFactory::new();
//! let mut db = MemoryDatabase::new(vec![Column::float("tilt")])
//!     .with_channel(Channel::new(1, "UWE", "Uwekahuna"))
//!     .with_rank(Rank::new(1, "DEFAULT", 1, true))
//!     .with_rank(Rank::new(2, "FINAL", 2, false));
//! db.insert(Measurement::new(100.0, 1, 1, vec![0.5]));
//! db.insert(Measurement::new(100.0, 2, 1, vec![0.7]));
//! factory.insert_database("tilt", db);
//!
//! let pool = SourcePool::new(vec![SourceConfig::new("tilt", "tilt")], Arc::new(factory));
//! let mut lease = pool.checkout("tilt").unwrap();
//! let query = DataQuery::new(TimeRange::new(0.0, 200.0).unwrap());
//! let reply = lease.execute(&GetData::Data(query)).unwrap();
//!
//! let SourceReply::Matrices { matrices, .. } = reply else { unreachable!() };
//! assert_eq!(matrices[0].rows(), 1);
//! assert_eq!(matrices[0].get(0, 1), 2.0); // FINAL wins
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Request lines, response headers and bodies
//! - [`query`]: Typed `getdata` requests
//! - [`encoder`] / [`decoder`]: Binary matrix codec and compression
//! - [`rank`]: Ranks and rank resolution
//! - [`downsample`]: Downsampling strategies
//! - [`guard`]: Row-limit guard
//! - [`store`]: Backing store contract and in-memory store
//! - [`source`] / [`pool`]: Data source handles and their pool
//! - [`client`]: Blocking protocol client

// Modules
pub mod client;
pub mod decoder;
pub mod downsample;
pub mod encoder;
pub mod error;
pub mod guard;
pub mod matrix;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod query;
pub mod rank;
pub mod source;
pub mod store;
pub mod time;

// Re-exports for convenient access
pub use client::{Client, Reply};
pub use decoder::Decoder;
pub use downsample::{Downsampling, DownsamplingType};
pub use encoder::Encoder;
pub use error::{DecodeError, EncodeError, ProtocolError, Result, StoreError, VdxError};
pub use guard::RowLimitGuard;
pub use matrix::{Column, ColumnKind, DataMatrix, INT_NO_DATA, NO_DATA};
pub use metrics::CompressionMetrics;
pub use pool::{PoolStats, SourceLease, SourcePool};
pub use protocol::{Body, Params, Request, Response, ResponseHeader, PROTOCOL_VERSION};
pub use query::{DataQuery, GetData, GetDataRequest};
pub use rank::{Measurement, Rank, RankResolver, RankTable, AUTO_RANK};
pub use source::{DataSource, SourceConfig, SourceDescriptor, SourceReply};
pub use store::{
    Channel, Filter, Grouping, MemoryDatabase, MemoryStore, MemoryStoreFactory, Store,
    StoreFactory, StoreResult,
};
pub use time::TimeRange;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
