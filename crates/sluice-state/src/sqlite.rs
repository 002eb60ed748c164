//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use sluice_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus, StreamName};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS sync_cursors (
    pipeline TEXT NOT NULL,
    stream TEXT NOT NULL,
    cursor_field TEXT,
    cursor_value TEXT,
    boundary_rows TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (pipeline, stream)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    stream TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_read INTEGER DEFAULT 0,
    records_written INTEGER DEFAULT 0,
    error_message TEXT
);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Boundary fingerprints are stored newline-separated, `NULL` when empty.
    fn encode_boundary(rows: &[String]) -> Option<String> {
        (!rows.is_empty()).then(|| rows.join("\n"))
    }

    fn decode_boundary(raw: Option<String>) -> Vec<String> {
        raw.map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| Utc::now().format(SQLITE_DATETIME_FMT).to_string(),
            |dt| dt.format(SQLITE_DATETIME_FMT).to_string(),
        )
    }
}

impl StateBackend for SqliteStateBackend {
    fn get_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT cursor_field, cursor_value, updated_at, boundary_rows \
                 FROM sync_cursors WHERE pipeline = ?1 AND stream = ?2",
                rusqlite::params![pipeline.as_str(), stream.as_str()],
                |row| {
                    let cursor_field: Option<String> = row.get(0)?;
                    let cursor_value: Option<String> = row.get(1)?;
                    let updated_at: String = row.get(2)?;
                    let boundary_rows: Option<String> = row.get(3)?;
                    Ok((cursor_field, cursor_value, updated_at, boundary_rows))
                },
            )
            .optional()?;

        Ok(
            row.map(|(cursor_field, cursor_value, updated_at, boundary_rows)| CursorState {
                cursor_field,
                cursor_value,
                updated_at: Self::sqlite_to_iso8601(&updated_at),
                boundary_rows: Self::decode_boundary(boundary_rows),
            }),
        )
    }

    fn set_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
        cursor: &CursorState,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated_at = Self::iso8601_to_sqlite(&cursor.updated_at);
        conn.execute(
            "INSERT INTO sync_cursors \
             (pipeline, stream, cursor_field, cursor_value, updated_at, boundary_rows) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(pipeline, stream) \
             DO UPDATE SET cursor_field = ?3, cursor_value = ?4, updated_at = ?5, \
             boundary_rows = ?6",
            rusqlite::params![
                pipeline.as_str(),
                stream.as_str(),
                cursor.cursor_field,
                cursor.cursor_value,
                updated_at,
                Self::encode_boundary(&cursor.boundary_rows),
            ],
        )?;
        Ok(())
    }

    fn compare_and_set(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
        expected: Option<&str>,
        new: &CursorState,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let updated_at = Self::iso8601_to_sqlite(&new.updated_at);
        let boundary_rows = Self::encode_boundary(&new.boundary_rows);

        let rows_affected = match expected {
            Some(expected_val) => conn.execute(
                "UPDATE sync_cursors SET cursor_field = ?1, cursor_value = ?2, updated_at = ?3, \
                 boundary_rows = ?7 \
                 WHERE pipeline = ?4 AND stream = ?5 AND cursor_value = ?6",
                rusqlite::params![
                    new.cursor_field,
                    new.cursor_value,
                    updated_at,
                    pipeline.as_str(),
                    stream.as_str(),
                    expected_val,
                    boundary_rows,
                ],
            )?,
            None => conn.execute(
                "INSERT INTO sync_cursors \
                 (pipeline, stream, cursor_field, cursor_value, updated_at, boundary_rows) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(pipeline, stream) \
                 DO UPDATE SET cursor_field = ?3, cursor_value = ?4, updated_at = ?5, \
                 boundary_rows = ?6 \
                 WHERE sync_cursors.cursor_value IS NULL",
                rusqlite::params![
                    pipeline.as_str(),
                    stream.as_str(),
                    new.cursor_field,
                    new.cursor_value,
                    updated_at,
                    boundary_rows,
                ],
            )?,
        };

        Ok(rows_affected > 0)
    }

    fn start_run(&self, pipeline: &PipelineId, stream: &StreamName) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_runs (pipeline, stream, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.as_str(),
                stream.as_str(),
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE sync_runs SET status = ?1, finished_at = datetime('now'), \
                 records_read = ?2, records_written = ?3, error_message = ?4 \
                 WHERE id = ?5",
                rusqlite::params![
                    status.as_str(),
                    stats.records_read as i64,
                    stats.records_written as i64,
                    stats.error_message,
                    run_id,
                ],
            )
            .map_err(|e| StateError::operation("complete_run", e))?;
        if updated == 0 {
            return Err(StateError::operation(
                "complete_run",
                rusqlite::Error::QueryReturnedNoRows,
            ));
        }
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn get_run(&self, run_id: i64) -> error::Result<Option<RunRecord>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT pipeline, stream, status, records_read, records_written, \
                 error_message, finished_at FROM sync_runs WHERE id = ?1",
                [run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StateError::operation("get_run", e))?;

        let Some((pipeline, stream, status, read, written, error_message, finished_at)) = row
        else {
            return Ok(None);
        };
        let status: RunStatus = status.parse().map_err(StateError::Corrupt)?;
        Ok(Some(RunRecord {
            id: run_id,
            pipeline: PipelineId::new(pipeline),
            stream: StreamName::new(stream),
            status,
            stats: RunStats {
                records_read: read.max(0) as u64,
                records_written: written.max(0) as u64,
                error_message,
            },
            finished_at: finished_at.map(|raw| Self::sqlite_to_iso8601(&raw)),
        }))
    }
}
