// VDX Server - CSV-backed store
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! CSV-backed store.
//!
//! Each database is a directory under the configured prefix:
//!
//! ```text
//! <prefix>/<database>/columns.csv   name,kind        (kind: float | integer)
//! <prefix>/<database>/channels.csv  id,code,name,lon,lat,height
//! <prefix>/<database>/ranks.csv     id,name,value,default
//! <prefix>/<database>/data.csv      time,rank,channel,<value columns...>
//! ```
//!
//! Empty cells read as the column's no-data sentinel. Files are read on
//! every call, so a store always reflects the current directory contents.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use vdx::store::{Channel, Filter, Store, StoreFactory, StoreResult};
use vdx::{Column, ColumnKind, Measurement, MemoryDatabase, Rank, SourceConfig, StoreError};

const COLUMNS_FILE: &str = "columns.csv";
const CHANNELS_FILE: &str = "channels.csv";
const RANKS_FILE: &str = "ranks.csv";
const DATA_FILE: &str = "data.csv";

const FIXED_DATA_COLUMNS: [&str; 3] = ["time", "rank", "channel"];

/// Opens [`CsvStore`]s rooted at one directory
#[derive(Debug, Clone)]
pub struct CsvStoreFactory {
    prefix: PathBuf,
}

impl CsvStoreFactory {
    /// Create a factory for databases under `prefix`
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Root directory
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Write a complete database, replacing existing files
    pub fn import(&self, database: &str, contents: &MemoryDatabase) -> StoreResult<()> {
        let dir = self.prefix.join(database);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let mut w = writer(&dir.join(COLUMNS_FILE))?;
        write_row(&mut w, &dir, ["name", "kind"])?;
        for column in &contents.columns {
            write_row(&mut w, &dir, [column.name.as_str(), kind_name(column.kind)])?;
        }
        flush(w, &dir)?;

        let mut w = writer(&dir.join(CHANNELS_FILE))?;
        write_row(&mut w, &dir, ["id", "code", "name", "lon", "lat", "height"])?;
        for ch in &contents.channels {
            let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
            write_row(
                &mut w,
                &dir,
                [
                    ch.id.to_string(),
                    ch.code.clone(),
                    ch.name.clone(),
                    opt(ch.lon),
                    opt(ch.lat),
                    opt(ch.height),
                ],
            )?;
        }
        flush(w, &dir)?;

        let mut w = writer(&dir.join(RANKS_FILE))?;
        write_row(&mut w, &dir, ["id", "name", "value", "default"])?;
        for rank in &contents.ranks {
            write_row(
                &mut w,
                &dir,
                [
                    rank.id.to_string(),
                    rank.name.clone(),
                    rank.value.to_string(),
                    u8::from(rank.is_default).to_string(),
                ],
            )?;
        }
        flush(w, &dir)?;

        let mut w = writer(&dir.join(DATA_FILE))?;
        let header: Vec<&str> = FIXED_DATA_COLUMNS
            .iter()
            .copied()
            .chain(contents.columns.iter().map(|c| c.name.as_str()))
            .collect();
        write_row(&mut w, &dir, header)?;
        for m in &contents.rows {
            let mut record = vec![m.time.to_string(), m.rank.to_string(), m.channel.to_string()];
            record.extend(m.values.iter().zip(&contents.columns).map(|(&v, column)| {
                if v.is_nan() || v == column.kind.no_data() {
                    String::new()
                } else {
                    v.to_string()
                }
            }));
            write_row(&mut w, &dir, record)?;
        }
        flush(w, &dir)
    }
}

impl StoreFactory for CsvStoreFactory {
    fn connect(&self, source: &SourceConfig) -> StoreResult<Box<dyn Store>> {
        debug!("opening csv store for source '{}'", source.name);
        if self.prefix.exists() && !self.prefix.is_dir() {
            return Err(StoreError::Unreachable(format!(
                "{} is not a directory",
                self.prefix.display()
            )));
        }
        Ok(Box::new(CsvStore {
            prefix: self.prefix.clone(),
            selected: None,
        }))
    }
}

/// A store reading CSV files under one prefix
#[derive(Debug)]
pub struct CsvStore {
    prefix: PathBuf,
    selected: Option<String>,
}

impl CsvStore {
    fn dir(&self) -> StoreResult<PathBuf> {
        let name = self.selected.as_deref().ok_or(StoreError::NoDatabaseSelected)?;
        Ok(self.prefix.join(name))
    }

    fn records(&self, file: &str) -> StoreResult<(PathBuf, Vec<csv::StringRecord>)> {
        let path = self.dir()?.join(file);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| StoreError::Query(format!("{}: {}", path.display(), e)))?;
        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt(&path, e))?;
        Ok((path, records))
    }

    fn read_data(&self, filter: &Filter) -> StoreResult<Vec<Measurement>> {
        let columns = self.columns_inner()?;
        let (path, records) = self.records(DATA_FILE)?;
        let width = FIXED_DATA_COLUMNS.len() + columns.len();

        let mut rows = Vec::new();
        for (line, record) in records.iter().enumerate() {
            if record.len() != width {
                return Err(corrupt(
                    &path,
                    format!("line {}: {} fields, expected {}", line + 2, record.len(), width),
                ));
            }
            let field = |i: usize| record.get(i).unwrap_or("").trim();
            let parse_err = |what: &str| corrupt(&path, format!("line {}: bad {}", line + 2, what));

            let time: f64 = field(0).parse().map_err(|_| parse_err("time"))?;
            let rank: u32 = field(1).parse().map_err(|_| parse_err("rank"))?;
            let channel: u32 = field(2).parse().map_err(|_| parse_err("channel"))?;
            let m = Measurement::new(time, rank, channel, Vec::new());
            if !filter.matches(&m) {
                continue;
            }

            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let raw = field(FIXED_DATA_COLUMNS.len() + i);
                let value = if raw.is_empty() {
                    column.kind.no_data()
                } else {
                    raw.parse().map_err(|_| parse_err(column.name.as_str()))?
                };
                values.push(value);
            }
            rows.push(Measurement { values, ..m });
        }
        Ok(rows)
    }

    fn columns_inner(&self) -> StoreResult<Vec<Column>> {
        let (path, records) = self.records(COLUMNS_FILE)?;
        records
            .iter()
            .map(|r| {
                let name = r.get(0).unwrap_or("").trim();
                match r.get(1).unwrap_or("float").trim() {
                    "float" | "" => Ok(Column::float(name)),
                    "integer" => Ok(Column::integer(name)),
                    other => Err(corrupt(&path, format!("unknown column kind '{}'", other))),
                }
            })
            .collect()
    }
}

impl Store for CsvStore {
    fn exists(&mut self, database: &str) -> StoreResult<bool> {
        Ok(self.prefix.join(database).join(DATA_FILE).is_file())
    }

    fn create(&mut self, database: &str) -> StoreResult<()> {
        debug!("creating csv database '{}'", database);
        let dir = self.prefix.join(database);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let headers: [(&str, &[&str]); 4] = [
            (COLUMNS_FILE, &["name", "kind"]),
            (CHANNELS_FILE, &["id", "code", "name", "lon", "lat", "height"]),
            (RANKS_FILE, &["id", "name", "value", "default"]),
            (DATA_FILE, &FIXED_DATA_COLUMNS),
        ];
        for (file, header) in headers {
            let path = dir.join(file);
            if path.exists() {
                continue;
            }
            let mut w = writer(&path)?;
            write_row(&mut w, &dir, header.iter())?;
            flush(w, &dir)?;
        }
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
        self.columns_inner()
    }

    fn channels(&mut self) -> StoreResult<Vec<Channel>> {
        let (path, records) = self.records(CHANNELS_FILE)?;
        records
            .iter()
            .map(|r| {
                let line = r.iter().map(str::trim).collect::<Vec<_>>().join(":");
                Channel::from_line(&line).ok_or_else(|| corrupt(&path, format!("bad channel '{}'", line)))
            })
            .collect()
    }

    fn ranks(&mut self) -> StoreResult<Vec<Rank>> {
        let (path, records) = self.records(RANKS_FILE)?;
        records
            .iter()
            .map(|r| {
                let line = r.iter().map(str::trim).collect::<Vec<_>>().join(":");
                Rank::from_line(&line).ok_or_else(|| corrupt(&path, format!("bad rank '{}'", line)))
            })
            .collect()
    }

    fn count(&mut self, filter: &Filter) -> StoreResult<usize> {
        let rows = self.read_data(filter)?;
        Ok(filter.grouping.count_groups(rows.iter().map(|m| m.time)))
    }

    fn query(&mut self, filter: &Filter) -> StoreResult<Vec<Measurement>> {
        self.read_data(filter)
    }

    fn close(&mut self) {
        self.selected = None;
    }
}

fn kind_name(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Float => "float",
        ColumnKind::Integer => "integer",
    }
}

fn corrupt(path: &Path, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        location: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Query(format!("{}: {}", path.display(), e))
}

fn writer(path: &Path) -> StoreResult<csv::Writer<fs::File>> {
    csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| StoreError::Query(format!("{}: {}", path.display(), e)))
}

fn write_row<I, T>(w: &mut csv::Writer<fs::File>, dir: &Path, record: I) -> StoreResult<()>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    w.write_record(record)
        .map_err(|e| StoreError::Query(format!("{}: {}", dir.display(), e)))
}

fn flush(mut w: csv::Writer<fs::File>, dir: &Path) -> StoreResult<()> {
    w.flush().map_err(|e| io_error(dir, e))
}
