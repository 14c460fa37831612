// VDX - Volcano Data Exchange
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ranks and rank resolution
//!
//! A measurement can be stored several times for the same instant, once per
//! processing tier ("rank"). The [`RankResolver`] reduces such a candidate
//! set to exactly one measurement per time key, either by pinning one rank
//! or by picking the best available data.
//!
//! # Tie-breaking
//!
//! In best-available mode the winner at a time key is the candidate whose
//! rank has the highest rank value. Equal rank values go to the lowest rank
//! id, and identical ranks keep the candidate that came first in the input.
//! Rank ids missing from the table score below every known rank.

use std::cmp::Ordering;
use std::fmt;

/// Rank id meaning "resolve automatically"
pub const AUTO_RANK: u32 = 0;

/// A quality tier of a data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rank {
    /// Rank id (never 0)
    pub id: u32,
    /// Display name
    pub name: String,
    /// Authority; higher wins
    pub value: i32,
    /// System-wide default rank
    pub is_default: bool,
}

impl Rank {
    /// Create a rank
    pub fn new(id: u32, name: impl Into<String>, value: i32, is_default: bool) -> Self {
        Self {
            id,
            name: name.into(),
            value,
            is_default,
        }
    }

    /// Wire form `id:name:value:default`
    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.id,
            self.name,
            self.value,
            u8::from(self.is_default)
        )
    }

    /// Parse the wire form
    pub fn from_line(line: &str) -> Option<Self> {
        let mut parts = line.trim().split(':');
        let id = parts.next()?.parse().ok()?;
        let name = parts.next()?.to_string();
        let value = parts.next()?.parse().ok()?;
        let is_default = parts.next()? == "1";
        Some(Self {
            id,
            name,
            value,
            is_default,
        })
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.value)
    }
}

/// One row of domain data
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// j2ksec
    pub time: f64,
    /// Rank id
    pub rank: u32,
    /// Channel id
    pub channel: u32,
    /// Values, laid out per the store's value columns
    pub values: Vec<f64>,
}

impl Measurement {
    /// Create a measurement
    pub fn new(time: f64, rank: u32, channel: u32, values: Vec<f64>) -> Self {
        Self {
            time,
            rank,
            channel,
            values,
        }
    }
}

/// Lookup table of the ranks known to one source
#[derive(Debug, Clone, Default)]
pub struct RankTable {
    ranks: Vec<Rank>,
}

impl RankTable {
    /// Build from a list of ranks
    pub fn new(ranks: Vec<Rank>) -> Self {
        Self { ranks }
    }

    /// Find a rank by id
    pub fn get(&self, id: u32) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.id == id)
    }

    /// The rank flagged as default, if any
    pub fn default_rank(&self) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.is_default)
    }

    /// All ranks, in table order
    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    /// Number of ranks
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Ordering key for best-available selection; greater is better
    fn score(&self, id: u32) -> (Option<i32>, std::cmp::Reverse<u32>) {
        (self.get(id).map(|r| r.value), std::cmp::Reverse(id))
    }
}

/// Reduces candidates to one measurement per time key
#[derive(Debug, Clone, Copy)]
pub struct RankResolver<'a> {
    table: &'a RankTable,
}

impl<'a> RankResolver<'a> {
    /// Create a resolver over a rank table
    pub fn new(table: &'a RankTable) -> Self {
        Self { table }
    }

    /// Resolve `candidates` for rank `rid` (0 = best available)
    ///
    /// The output is in ascending time order with at most one measurement
    /// per time value. Candidates with a NaN time are dropped.
    pub fn resolve(&self, rid: u32, candidates: Vec<Measurement>) -> Vec<Measurement> {
        let mut candidates: Vec<Measurement> = candidates
            .into_iter()
            .filter(|m| !m.time.is_nan())
            .filter(|m| rid == AUTO_RANK || m.rank == rid)
            .collect();

        // stable: equal times keep input order
        candidates.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));

        let mut resolved: Vec<Measurement> = Vec::with_capacity(candidates.len());
        for m in candidates {
            match resolved.last_mut() {
                Some(last) if last.time == m.time => {
                    if rid == AUTO_RANK && self.table.score(m.rank) > self.table.score(last.rank) {
                        *last = m;
                    }
                }
                _ => resolved.push(m),
            }
        }
        resolved
    }
}
