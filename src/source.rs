// VDX - Volcano Data Exchange
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Data sources
//!
//! A [`DataSource`] is one handle bound to one store connection. It owns
//! that connection's selected database and runs the full `getdata`
//! pipeline on it:
//!
//! ```text
//! guard estimate -> fetch -> rank resolution -> downsampling -> matrices
//! ```
//!
//! Handles are created and recycled by [`crate::pool::SourcePool`]; a
//! caller only ever holds one through an exclusive lease.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::downsample::Downsampling;
use crate::encoder::Encoder;
use crate::error::{ProtocolError, Result, StoreError, VdxError};
use crate::guard::RowLimitGuard;
use crate::matrix::{Column, DataMatrix, RANK_COLUMN, TIME_COLUMN};
use crate::protocol::{Params, Response};
use crate::query::{DataQuery, GetData};
use crate::rank::{Measurement, RankResolver, RankTable};
use crate::store::{Filter, Grouping, Store};

/// Default bound on idle handles kept per source
pub const DEFAULT_MAX_IDLE: usize = 4;

fn default_max_idle() -> usize {
    DEFAULT_MAX_IDLE
}

/// Configuration of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name clients use in `source=`
    pub name: String,
    /// Free-text description shown by `menu`
    #[serde(default)]
    pub description: String,
    /// Datatype shown by `menu` (tilt, rsam, hypocenters, ...)
    #[serde(rename = "type")]
    pub datatype: String,
    /// Database to select; defaults to the source name
    #[serde(default)]
    pub database: Option<String>,
    /// Row cap per query, 0 for unlimited
    #[serde(default)]
    pub maxrows: usize,
    /// Idle handles kept for reuse
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
}

impl SourceConfig {
    /// Create a config with defaults
    pub fn new(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            datatype: datatype.into(),
            database: None,
            maxrows: 0,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set row cap
    pub fn with_maxrows(mut self, maxrows: usize) -> Self {
        self.maxrows = maxrows;
        self
    }

    /// Set idle bound
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Database this source selects
    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.name)
    }

    /// `menu` line
    pub fn menu_line(&self) -> String {
        format!(
            "source={}; description={}; type={};",
            self.name, self.description, self.datatype
        )
    }
}

/// Cached, immutable description of a source plus its bootstrap state
#[derive(Debug)]
pub struct SourceDescriptor {
    config: SourceConfig,
    guard: RowLimitGuard,
    initialized: AtomicBool,
}

impl SourceDescriptor {
    /// Build from configuration
    pub fn new(config: SourceConfig) -> Self {
        Self {
            guard: RowLimitGuard::new(config.maxrows),
            config,
            initialized: AtomicBool::new(false),
        }
    }

    /// Configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Row-limit guard
    pub fn guard(&self) -> RowLimitGuard {
        self.guard
    }

    /// Check whether `init` has succeeded once
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run the store bootstrap unless it already succeeded
    ///
    /// `init` is idempotent, so a race between two first connections only
    /// costs a redundant call.
    pub fn ensure_initialized(&self, store: &mut dyn Store) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        debug!("initializing database '{}'", self.config.database());
        store.init(self.config.database())?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }
}

/// Output of a `getdata` action, before framing
#[derive(Debug, Clone, PartialEq)]
pub enum SourceReply {
    /// Catalogue lines
    Lines(Vec<String>),
    /// One matrix per channel, in request order
    Matrices {
        /// Channel ids
        channels: Vec<u32>,
        /// Matrices
        matrices: Vec<DataMatrix>,
    },
}

impl SourceReply {
    /// Total rows over all matrices; line count for text replies
    pub fn rows(&self) -> usize {
        match self {
            SourceReply::Lines(lines) => lines.len(),
            SourceReply::Matrices { matrices, .. } => matrices.iter().map(DataMatrix::rows).sum(),
        }
    }

    /// Frame as a protocol response, compressing matrices
    pub fn into_response(self, encoder: &mut Encoder) -> Result<Response> {
        match self {
            SourceReply::Lines(lines) => Ok(Response::text(lines)),
            SourceReply::Matrices { channels, matrices } => {
                let payload = encoder.encode_payload(&matrices)?;
                let rows: usize = matrices.iter().map(DataMatrix::rows).sum();
                let columns = matrices
                    .first()
                    .map(|m| {
                        m.columns()
                            .iter()
                            .map(|c| c.name.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                let channels = channels
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");

                let mut params = Params::new();
                params.insert("matrices".to_string(), matrices.len().to_string());
                params.insert("rows".to_string(), rows.to_string());
                params.insert("channels".to_string(), channels);
                params.insert("columns".to_string(), columns);
                Ok(Response::binary(params, payload))
            }
        }
    }
}

/// A pooled handle bound to one store connection
pub struct DataSource {
    id: u64,
    descriptor: std::sync::Arc<SourceDescriptor>,
    store: Box<dyn Store>,
    broken: bool,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("source", &self.descriptor.config.name)
            .field("selected", &self.store.selected())
            .field("broken", &self.broken)
            .finish()
    }
}

impl DataSource {
    /// Wrap a connected store
    pub fn new(id: u64, descriptor: std::sync::Arc<SourceDescriptor>, store: Box<dyn Store>) -> Self {
        Self {
            id,
            descriptor,
            store,
            broken: false,
        }
    }

    /// Handle instance id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Source name
    pub fn name(&self) -> &str {
        &self.descriptor.config.name
    }

    /// Source descriptor
    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Underlying store
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Underlying store, mutably
    pub fn store_mut(&mut self) -> &mut dyn Store {
        self.store.as_mut()
    }

    /// Check whether the connection failed and must not be reused
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Close the connection
    pub fn close(&mut self) {
        self.store.close();
    }

    /// Run one `getdata` action
    pub fn execute(&mut self, action: &GetData) -> Result<SourceReply> {
        let result = self.run(action);
        if let Err(VdxError::Store(StoreError::Unreachable(reason))) = &result {
            warn!("source '{}' handle {} unreachable: {}", self.name(), self.id, reason);
            self.broken = true;
        }
        result
    }

    fn run(&mut self, action: &GetData) -> Result<SourceReply> {
        self.select()?;
        match action {
            GetData::Channels => {
                let lines = self.store.channels()?.iter().map(|c| c.to_line()).collect();
                Ok(SourceReply::Lines(lines))
            }
            GetData::Ranks => {
                let lines = self.store.ranks()?.iter().map(|r| r.to_line()).collect();
                Ok(SourceReply::Lines(lines))
            }
            GetData::Data(query) => self.data(query),
        }
    }

    /// Make sure this handle's connection points at the source database
    fn select(&mut self) -> Result<()> {
        let database = self.descriptor.config.database();
        if self.store.selected() != Some(database) {
            self.store.use_database(database)?;
        }
        Ok(())
    }

    fn data(&mut self, query: &DataQuery) -> Result<SourceReply> {
        let catalogue = self.store.channels()?;
        let channels = match &query.channels {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !catalogue.iter().any(|c| c.id == **id)) {
                    return Err(ProtocolError::InvalidParameter {
                        name: "ch",
                        value: unknown.to_string(),
                        reason: format!("no such channel in source '{}'", self.name()),
                    }
                    .into());
                }
                ids.clone()
            }
            None => catalogue.iter().map(|c| c.id).collect(),
        };

        let value_columns = self.store.columns()?;
        let table = RankTable::new(self.store.ranks()?);
        let resolver = RankResolver::new(&table);

        let grouping = match query.downsampling.bucket_width() {
            Some(width) => Grouping::Bucket(width),
            None => Grouping::Time,
        };
        let filters: Vec<Filter> = channels
            .iter()
            .map(|&ch| Filter::new(ch, query.rank, query.range).with_grouping(grouping))
            .collect();

        let guard = self.descriptor.guard;
        guard.admit(self.store.as_mut(), &filters, &query.downsampling)?;

        let mut columns = vec![Column::float(TIME_COLUMN), Column::integer(RANK_COLUMN)];
        columns.extend(value_columns.iter().cloned());

        let mut matrices = Vec::with_capacity(filters.len());
        let mut total = 0usize;
        for filter in &filters {
            let candidates = self.store.query(filter)?;
            let resolved = resolver.resolve(query.rank, candidates);
            let matrix = to_matrix(&columns, resolved, filter.channel)?;
            let matrix = query.downsampling.apply(matrix);
            total += matrix.rows();
            // the store may have changed since the count
            guard.check(total)?;
            matrices.push(matrix);
        }

        debug!(
            "source '{}': {} rows over {} channels ({})",
            self.name(),
            total,
            channels.len(),
            downsampling_label(&query.downsampling)
        );
        Ok(SourceReply::Matrices { channels, matrices })
    }
}

fn downsampling_label(ds: &Downsampling) -> String {
    match ds {
        Downsampling::None => "NONE".to_string(),
        Downsampling::Decimate(n) => format!("DECIMATE {}", n),
        Downsampling::Mean(w) => format!("MEAN {}s", w),
    }
}

fn to_matrix(columns: &[Column], rows: Vec<Measurement>, channel: u32) -> Result<DataMatrix> {
    let width = columns.len();
    let mut matrix = DataMatrix::with_capacity(columns.to_vec(), rows.len());
    let mut row = Vec::with_capacity(width);
    for m in rows {
        if m.values.len() + 2 != width {
            return Err(StoreError::Corrupt {
                location: format!("channel {} at {}", channel, m.time),
                reason: format!("{} values for {} columns", m.values.len(), width - 2),
            }
            .into());
        }
        row.clear();
        row.push(m.time);
        row.push(f64::from(m.rank));
        row.extend_from_slice(&m.values);
        matrix.push_row(&row);
    }
    Ok(matrix)
}
