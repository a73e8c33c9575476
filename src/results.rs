//! Append-only history of completed measurements.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub download_speed: f64,
    pub upload_speed: f64,
    pub recorded_at: DateTime<Utc>,
}

impl MeasurementRecord {
    pub fn speeds(&self) -> (f64, f64) {
        (self.download_speed, self.upload_speed)
    }
}

/// Durable (or in-memory) storage for the results history.
///
/// Records are only ever appended. `get_last` on an empty history is a
/// caller error and returns [`Error::InvalidState`]; check `is_empty` first.
pub trait ResultsStore: Send + Sync {
    fn is_empty(&self) -> Result<bool>;
    fn add_result(&self, download_speed: f64, upload_speed: f64) -> Result<()>;
    fn get_last(&self) -> Result<MeasurementRecord>;
    fn len(&self) -> Result<usize>;
    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<MeasurementRecord>>;
}

fn validate_speed(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidState(format!(
            "{name} speed must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

fn empty_history() -> Error {
    Error::InvalidState("results history is empty".to_string())
}

pub struct SqliteResults {
    conn: Mutex<Connection>,
}

impl SqliteResults {
    /// Opens the history at `path`, creating the file and schema if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        Self::init(conn, path.as_ref().display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn init(conn: Connection, location: String) -> Result<Self> {
        // In-memory databases reject WAL and stay on the default journal
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            debug!("WAL journal mode unavailable for {location}: {e}");
        }
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                download_mbps REAL NOT NULL,
                upload_mbps REAL NOT NULL,
                recorded_at INTEGER NOT NULL
            )",
            [],
        )?;

        info!("results history opened at {location}");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MeasurementRecord> {
        let millis: i64 = row.get(2)?;
        Ok(MeasurementRecord {
            download_speed: row.get(0)?,
            upload_speed: row.get(1)?,
            recorded_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
        })
    }
}

impl ResultsStore for SqliteResults {
    fn is_empty(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM measurements)",
            [],
            |row| row.get(0),
        )?;
        Ok(!exists)
    }

    fn add_result(&self, download_speed: f64, upload_speed: f64) -> Result<()> {
        validate_speed("download", download_speed)?;
        validate_speed("upload", upload_speed)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO measurements (download_mbps, upload_mbps, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![download_speed, upload_speed, Utc::now().timestamp_millis()],
        )?;
        debug!("stored result: {download_speed:.2} / {upload_speed:.2} Mbps");
        Ok(())
    }

    fn get_last(&self) -> Result<MeasurementRecord> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT download_mbps, upload_mbps, recorded_at
             FROM measurements ORDER BY id DESC LIMIT 1",
            [],
            Self::record_from_row,
        )
        .optional()?
        .ok_or_else(empty_history)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn recent(&self, limit: usize) -> Result<Vec<MeasurementRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT download_mbps, upload_mbps, recorded_at
             FROM measurements ORDER BY id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

/// Non-durable history with the same contract as [`SqliteResults`].
#[derive(Default)]
pub struct MemoryResults {
    records: RwLock<Vec<MeasurementRecord>>,
}

impl MemoryResults {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultsStore for MemoryResults {
    fn is_empty(&self) -> Result<bool> {
        Ok(self.records.read().is_empty())
    }

    fn add_result(&self, download_speed: f64, upload_speed: f64) -> Result<()> {
        validate_speed("download", download_speed)?;
        validate_speed("upload", upload_speed)?;

        self.records.write().push(MeasurementRecord {
            download_speed,
            upload_speed,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    fn get_last(&self) -> Result<MeasurementRecord> {
        self.records.read().last().cloned().ok_or_else(empty_history)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    fn recent(&self, limit: usize) -> Result<Vec<MeasurementRecord>> {
        Ok(self.records.read().iter().rev().take(limit).cloned().collect())
    }
}
