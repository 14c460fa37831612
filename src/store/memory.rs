//! In-memory store
//!
//! Every [`MemoryStore`] connected by one [`MemoryStoreFactory`] shares the
//! same set of databases, the way several connections to one database
//! server would, while keeping its own selected database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::{Channel, Filter, Store, StoreFactory, StoreResult};
use crate::error::StoreError;
use crate::matrix::Column;
use crate::rank::{Measurement, Rank};
use crate::source::SourceConfig;

/// Contents of one database
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    /// Value columns
    pub columns: Vec<Column>,
    /// Channel catalogue
    pub channels: Vec<Channel>,
    /// Rank catalogue
    pub ranks: Vec<Rank>,
    /// All stored measurements, any order
    pub rows: Vec<Measurement>,
}

impl MemoryDatabase {
    /// Create an empty database with the given value columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    /// Add a channel
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Add a rank
    pub fn with_rank(mut self, rank: Rank) -> Self {
        self.ranks.push(rank);
        self
    }

    /// Store a measurement
    pub fn insert(&mut self, measurement: Measurement) {
        self.rows.push(measurement);
    }
}

#[derive(Debug, Default)]
struct Backend {
    databases: RwLock<HashMap<String, MemoryDatabase>>,
    offline: AtomicBool,
    latency: RwLock<Duration>,
    next_id: AtomicU64,
}

impl Backend {
    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory backend offline".to_string()));
        }
        let latency = *self.latency.read();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        Ok(())
    }
}

/// A connection to the shared in-memory backend
#[derive(Debug)]
pub struct MemoryStore {
    backend: Arc<Backend>,
    selected: Option<String>,
    id: u64,
}

impl MemoryStore {
    /// Connection id, unique per factory
    pub fn id(&self) -> u64 {
        self.id
    }

    fn with_selected<T>(&self, f: impl FnOnce(&MemoryDatabase) -> T) -> StoreResult<T> {
        self.backend.check_online()?;
        let name = self.selected.as_deref().ok_or(StoreError::NoDatabaseSelected)?;
        let databases = self.backend.databases.read();
        let db = databases
            .get(name)
            .ok_or_else(|| StoreError::MissingDatabase(name.to_string()))?;
        Ok(f(db))
    }
}

impl Store for MemoryStore {
    fn exists(&mut self, database: &str) -> StoreResult<bool> {
        self.backend.check_online()?;
        Ok(self.backend.databases.read().contains_key(database))
    }

    fn create(&mut self, database: &str) -> StoreResult<()> {
        self.backend.check_online()?;
        self.backend
            .databases
            .write()
            .entry(database.to_string())
            .or_default();
        Ok(())
    }

    fn use_database(&mut self, database: &str) -> StoreResult<()> {
        if !self.exists(database)? {
            return Err(StoreError::MissingDatabase(database.to_string()));
        }
        self.selected = Some(database.to_string());
        Ok(())
    }

    fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    fn columns(&mut self) -> StoreResult<Vec<Column>> {
        self.with_selected(|db| db.columns.clone())
    }

    fn channels(&mut self) -> StoreResult<Vec<Channel>> {
        self.with_selected(|db| db.channels.clone())
    }

    fn ranks(&mut self) -> StoreResult<Vec<Rank>> {
        self.with_selected(|db| db.ranks.clone())
    }

    fn count(&mut self, filter: &Filter) -> StoreResult<usize> {
        self.with_selected(|db| {
            let times = db.rows.iter().filter(|m| filter.matches(m)).map(|m| m.time);
            filter.grouping.count_groups(times)
        })
    }

    fn query(&mut self, filter: &Filter) -> StoreResult<Vec<Measurement>> {
        self.with_selected(|db| {
            db.rows
                .iter()
                .filter(|m| filter.matches(m))
                .cloned()
                .collect()
        })
    }

    fn close(&mut self) {
        self.selected = None;
    }
}

/// Connects [`MemoryStore`]s to one shared backend
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory {
    backend: Arc<Backend>,
}

impl MemoryStoreFactory {
    /// Create a factory with an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a database
    pub fn insert_database(&self, name: impl Into<String>, database: MemoryDatabase) {
        self.backend.databases.write().insert(name.into(), database);
    }

    /// Mutate a database in place; returns false if it does not exist
    pub fn update_database(&self, name: &str, f: impl FnOnce(&mut MemoryDatabase)) -> bool {
        match self.backend.databases.write().get_mut(name) {
            Some(db) => {
                f(db);
                true
            }
            None => false,
        }
    }

    /// Check whether a database exists
    pub fn has_database(&self, name: &str) -> bool {
        self.backend.databases.read().contains_key(name)
    }

    /// Make every call fail with [`StoreError::Unreachable`]
    pub fn set_offline(&self, offline: bool) {
        self.backend.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call, to simulate a slow server
    pub fn set_latency(&self, latency: Duration) {
        *self.backend.latency.write() = latency;
    }

    /// Number of connections opened so far
    pub fn connections(&self) -> u64 {
        self.backend.next_id.load(Ordering::SeqCst)
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn connect(&self, _source: &SourceConfig) -> StoreResult<Box<dyn Store>> {
        self.backend.check_online()?;
        let id = self.backend.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MemoryStore {
            backend: Arc::clone(&self.backend),
            selected: None,
            id,
        }))
    }
}
