//! Row-limit guard
//!
//! Keeps a single query from materializing more rows than a source allows.
//! The estimate comes from [`Store::count`] with the very [`Filter`] the
//! fetch will use; the fetched result is checked again afterwards since the
//! two calls may see different snapshots.

use log::warn;

use crate::downsample::Downsampling;
use crate::error::{Result, VdxError};
use crate::store::{Filter, Store};

/// Per-source row cap; 0 means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowLimitGuard {
    max_rows: usize,
}

impl RowLimitGuard {
    /// Create a guard with a cap
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    /// The cap
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Check if the guard never trips
    pub fn is_unlimited(&self) -> bool {
        self.max_rows == 0
    }

    /// Fail if `rows` is above the cap
    pub fn check(&self, rows: usize) -> Result<()> {
        if !self.is_unlimited() && rows > self.max_rows {
            warn!("row limit {} exceeded: {} rows", self.max_rows, rows);
            return Err(VdxError::LimitExceeded {
                limit: self.max_rows,
                rows,
            });
        }
        Ok(())
    }

    /// Estimated result rows over all filters after downsampling
    pub fn estimate(
        &self,
        store: &mut dyn Store,
        filters: &[Filter],
        downsampling: &Downsampling,
    ) -> Result<usize> {
        let mut total = 0usize;
        for filter in filters {
            let grouped = store.count(filter)?;
            total = total.saturating_add(downsampling.estimate(grouped));
        }
        Ok(total)
    }

    /// Estimate and check before fetching; nothing is counted when unlimited
    pub fn admit(
        &self,
        store: &mut dyn Store,
        filters: &[Filter],
        downsampling: &Downsampling,
    ) -> Result<()> {
        if self.is_unlimited() {
            return Ok(());
        }
        let rows = self.estimate(store, filters, downsampling)?;
        self.check(rows)
    }
}
