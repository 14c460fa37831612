// VDX - Volcano Data Exchange
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Backing store abstraction
//!
//! A [`Store`] owns the connection to one backing database server and the
//! "currently selected database" state that goes with it. Data sources
//! drive it through a small contract: schema bootstrap, channel and rank
//! catalogues, and the count/fetch pair used by the row-limit guard.
//!
//! [`memory::MemoryStore`] is the in-process implementation used for
//! fixtures and tests.

pub mod memory;

pub use memory::{MemoryDatabase, MemoryStore, MemoryStoreFactory};

use std::fmt;

use crate::downsample::bucket_key;
use crate::error::StoreError;
use crate::matrix::Column;
use crate::rank::{Measurement, Rank, AUTO_RANK};
use crate::source::SourceConfig;
use crate::time::TimeRange;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A measurement site of a source
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Channel id
    pub id: u32,
    /// Short code
    pub code: String,
    /// Display name
    pub name: String,
    /// Longitude in degrees
    pub lon: Option<f64>,
    /// Latitude in degrees
    pub lat: Option<f64>,
    /// Height in meters
    pub height: Option<f64>,
}

impl Channel {
    /// Create a channel without a location
    pub fn new(id: u32, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            name: name.into(),
            lon: None,
            lat: None,
            height: None,
        }
    }

    /// Set the location
    pub fn with_location(mut self, lon: f64, lat: f64, height: f64) -> Self {
        self.lon = Some(lon);
        self.lat = Some(lat);
        self.height = Some(height);
        self
    }

    /// Wire form `id:code:name:lon:lat:height`, unknown fields left empty
    pub fn to_line(&self) -> String {
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.id,
            self.code,
            self.name,
            opt(self.lon),
            opt(self.lat),
            opt(self.height)
        )
    }

    /// Parse the wire form
    pub fn from_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        let opt = |s: &str| -> Option<Option<f64>> {
            if s.is_empty() {
                Some(None)
            } else {
                s.parse().ok().map(Some)
            }
        };
        Some(Self {
            id: parts[0].parse().ok()?,
            code: parts[1].to_string(),
            name: parts[2].to_string(),
            lon: opt(parts[3])?,
            lat: opt(parts[4])?,
            height: opt(parts[5])?,
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.id)
    }
}

/// How fetched rows collapse into result rows
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Grouping {
    /// One result row per distinct time
    #[default]
    Time,
    /// One result row per `floor(time / width)` bucket
    Bucket(f64),
}

impl Grouping {
    /// Number of distinct groups among `times`
    pub fn count_groups(&self, times: impl Iterator<Item = f64>) -> usize {
        let mut keys: Vec<i64> = match self {
            // +0.0 folds -0.0 into 0.0
            Grouping::Time => times.map(|t| (t + 0.0).to_bits() as i64).collect(),
            Grouping::Bucket(width) => times.map(|t| bucket_key(t, *width)).collect(),
        };
        keys.sort_unstable();
        keys.dedup();
        keys.len()
    }
}

/// Selection of measurements for one channel
///
/// The same value is handed to [`Store::count`] and [`Store::query`], so the
/// guard's estimate and the fetch describe the same rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    /// Channel id
    pub channel: u32,
    /// Rank id, [`AUTO_RANK`] for every rank
    pub rank: u32,
    /// Inclusive time range
    pub range: TimeRange,
    /// Grouping the count is expressed in
    pub grouping: Grouping,
}

impl Filter {
    /// Create a filter grouping by time
    pub fn new(channel: u32, rank: u32, range: TimeRange) -> Self {
        Self {
            channel,
            rank,
            range,
            grouping: Grouping::Time,
        }
    }

    /// Set the grouping
    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    /// Check if a measurement is selected
    pub fn matches(&self, m: &Measurement) -> bool {
        m.channel == self.channel
            && (self.rank == AUTO_RANK || m.rank == self.rank)
            && self.range.contains(m.time)
    }
}

/// Contract between a data source and its backing database server
pub trait Store: Send {
    /// Check whether `database` exists
    fn exists(&mut self, database: &str) -> StoreResult<bool>;

    /// Create `database` with an empty schema
    fn create(&mut self, database: &str) -> StoreResult<()>;

    /// Create `database` unless it already exists
    fn init(&mut self, database: &str) -> StoreResult<()> {
        if !self.exists(database)? {
            self.create(database)?;
        }
        Ok(())
    }

    /// Select the database later calls run against
    fn use_database(&mut self, database: &str) -> StoreResult<()>;

    /// Currently selected database
    fn selected(&self) -> Option<&str>;

    /// Value columns, in measurement order
    fn columns(&mut self) -> StoreResult<Vec<Column>>;

    /// Channel catalogue
    fn channels(&mut self) -> StoreResult<Vec<Channel>>;

    /// Rank catalogue
    fn ranks(&mut self) -> StoreResult<Vec<Rank>>;

    /// Number of result rows `filter` groups into
    fn count(&mut self, filter: &Filter) -> StoreResult<usize>;

    /// Fetch the candidate measurements selected by `filter`
    fn query(&mut self, filter: &Filter) -> StoreResult<Vec<Measurement>>;

    /// Release the connection
    fn close(&mut self) {}
}

/// Opens store connections for a source
pub trait StoreFactory: Send + Sync {
    /// Connect a new store for `source`
    fn connect(&self, source: &SourceConfig) -> StoreResult<Box<dyn Store>>;
}
