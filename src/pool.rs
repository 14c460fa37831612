// VDX - Volcano Data Exchange
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Data source pool
//!
//! Handles are constructed lazily per source, leased exclusively and taken
//! back when the [`SourceLease`] drops. The registry lock only guards map
//! look-ups and idle-list pushes and pops; connecting, bootstrapping and
//! querying a store always happen outside it.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{ProtocolError, Result};
use crate::source::{DataSource, SourceConfig, SourceDescriptor};
use crate::store::StoreFactory;

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles connected
    pub created: u64,
    /// Leases handed out
    pub leased: u64,
    /// Handles put back on an idle list
    pub returned: u64,
    /// Handles closed instead of returned
    pub discarded: u64,
}

impl PoolStats {
    /// Leases currently outstanding
    pub fn outstanding(&self) -> u64 {
        self.leased
            .saturating_sub(self.returned)
            .saturating_sub(self.discarded)
    }
}

struct Entry {
    descriptor: Arc<SourceDescriptor>,
    idle: Vec<DataSource>,
}

struct PoolInner {
    factory: Arc<dyn StoreFactory>,
    sources: Vec<SourceConfig>,
    registry: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    created: AtomicU64,
    leased: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
}

/// Shared pool of data source handles, cheap to clone
#[derive(Clone)]
pub struct SourcePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePool")
            .field("sources", &self.inner.sources.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl SourcePool {
    /// Create a pool over configured sources; later duplicates of a name are ignored
    pub fn new(sources: Vec<SourceConfig>, factory: Arc<dyn StoreFactory>) -> Self {
        let mut unique: Vec<SourceConfig> = Vec::with_capacity(sources.len());
        for source in sources {
            if unique.iter().any(|s| s.name == source.name) {
                warn!("ignoring duplicate source '{}'", source.name);
                continue;
            }
            unique.push(source);
        }
        info!("source pool created with {} sources", unique.len());
        Self {
            inner: Arc::new(PoolInner {
                factory,
                sources: unique,
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                leased: AtomicU64::new(0),
                returned: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Configured sources, in configuration order
    pub fn sources(&self) -> &[SourceConfig] {
        &self.inner.sources
    }

    /// Check if a source is configured
    pub fn contains(&self, name: &str) -> bool {
        self.config(name).is_some()
    }

    fn config(&self, name: &str) -> Option<&SourceConfig> {
        self.inner.sources.iter().find(|s| s.name == name)
    }

    /// Lease a handle for `name`
    ///
    /// Reuses an idle handle when one is available, otherwise connects a
    /// new one. The first successful connection of a source also runs the
    /// store bootstrap.
    pub fn checkout(&self, name: &str) -> Result<SourceLease> {
        let config = self
            .config(name)
            .ok_or_else(|| ProtocolError::UnknownSource(name.to_string()))?;

        let (descriptor, idle) = {
            let mut registry = self.inner.registry.lock();
            let entry = registry.entry(name.to_string()).or_insert_with(|| {
                debug!("constructing descriptor for source '{}'", name);
                Entry {
                    descriptor: Arc::new(SourceDescriptor::new(config.clone())),
                    idle: Vec::new(),
                }
            });
            (Arc::clone(&entry.descriptor), entry.idle.pop())
        };

        let source = match idle {
            Some(source) => source,
            None => self.connect(descriptor)?,
        };

        self.inner.leased.fetch_add(1, Ordering::Relaxed);
        Ok(SourceLease {
            pool: Arc::clone(&self.inner),
            source: Some(source),
            discard: false,
        })
    }

    fn connect(&self, descriptor: Arc<SourceDescriptor>) -> Result<DataSource> {
        let mut store = self.inner.factory.connect(descriptor.config())?;
        if let Err(e) = descriptor.ensure_initialized(store.as_mut()) {
            store.close();
            return Err(e);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        debug!("connected handle {} for source '{}'", id, descriptor.config().name);
        Ok(DataSource::new(id, descriptor, store))
    }

    /// Idle handles currently held for `name`
    pub fn idle(&self, name: &str) -> usize {
        self.inner
            .registry
            .lock()
            .get(name)
            .map_or(0, |e| e.idle.len())
    }

    /// Counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            leased: self.inner.leased.load(Ordering::Relaxed),
            returned: self.inner.returned.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Close idle handles; leases dropped afterwards close their handle too
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let idle: Vec<DataSource> = {
            let mut registry = self.inner.registry.lock();
            registry.values_mut().flat_map(|e| e.idle.drain(..)).collect()
        };
        for mut source in idle {
            source.close();
        }
    }
}

/// Exclusive use of one handle; returned to the pool on drop
pub struct SourceLease {
    pool: Arc<PoolInner>,
    source: Option<DataSource>,
    discard: bool,
}

impl SourceLease {
    /// Close the handle on drop instead of returning it
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl std::fmt::Debug for SourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLease")
            .field("source", &self.source)
            .field("discard", &self.discard)
            .finish()
    }
}

impl Deref for SourceLease {
    type Target = DataSource;

    fn deref(&self) -> &DataSource {
        // only taken in drop
        self.source.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for SourceLease {
    fn deref_mut(&mut self) -> &mut DataSource {
        self.source.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let pool = &self.pool;

        let reusable = !self.discard
            && !source.is_broken()
            && !std::thread::panicking()
            && !pool.closed.load(Ordering::SeqCst);

        if reusable {
            let max_idle = source.descriptor().config().max_idle;
            let mut registry = pool.registry.lock();
            if let Some(entry) = registry.get_mut(source.name()) {
                if entry.idle.len() < max_idle {
                    entry.idle.push(source);
                    pool.returned.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        debug!("closing handle {} of source '{}'", source.id(), source.name());
        source.close();
        pool.discarded.fetch_add(1, Ordering::Relaxed);
    }
}
