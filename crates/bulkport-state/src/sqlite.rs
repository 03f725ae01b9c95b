//! `SQLite`-backed implementation of [`StateBackend`] and [`ProcessedCache`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bulkport_types::failure::{FailureRecord, Timestamp};
use bulkport_types::state::{
    Entity, EntityId, EntityStatus, NewEntity, PipelineName, Tracker, TrackerId, TrackerStatus,
};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::{ProcessedCache, StateBackend};
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS import_entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bulk_import_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_full_path TEXT NOT NULL,
    source_version TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (bulk_import_id, source_full_path)
);

CREATE TABLE IF NOT EXISTS import_trackers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES import_entities(id),
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    has_next_page INTEGER NOT NULL DEFAULT 0,
    next_page TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (entity_id, pipeline)
);

CREATE TABLE IF NOT EXISTS import_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES import_entities(id),
    pipeline_class TEXT NOT NULL,
    pipeline_step TEXT NOT NULL,
    step_class TEXT,
    exception_class TEXT NOT NULL,
    exception_message TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failures_entity ON import_failures (entity_id);

CREATE TABLE IF NOT EXISTS processed_entries (
    cache_key TEXT NOT NULL,
    entry_index INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_key, entry_index)
) WITHOUT ROWID;
";

const ENTITY_COLUMNS: &str =
    "id, bulk_import_id, source_type, source_full_path, source_version, status";

const TRACKER_COLUMNS: &str =
    "id, entity_id, pipeline, status, has_next_page, next_page, retry_count";

type EntityRow = (i64, String, String, String, Option<String>, String);
type TrackerRow = (i64, i64, String, String, bool, Option<String>, i64);

fn read_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn read_tracker_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackerRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn entity_from_row(row: EntityRow) -> error::Result<Entity> {
    let (id, bulk_import_id, source_type, source_full_path, source_version, status) = row;
    Ok(Entity {
        id: EntityId::new(id),
        bulk_import_id,
        source_type,
        source_full_path,
        source_version,
        status: status.parse::<EntityStatus>()?,
    })
}

fn tracker_from_row(row: TrackerRow) -> error::Result<Tracker> {
    let (id, entity_id, pipeline, status, has_next_page, next_page, retry_count) = row;
    Ok(Tracker {
        id: TrackerId::new(id),
        entity_id: EntityId::new(entity_id),
        pipeline: PipelineName::new(pipeline),
        status: status.parse::<TrackerStatus>()?,
        has_next_page,
        next_page,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
    })
}

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
        tracing::debug!(path = %path.display(), "Opened sqlite state backend");
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

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
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
            |_| iso.to_string(),
            |dt| dt.with_timezone(&Utc).format(SQLITE_DATETIME_FMT).to_string(),
        )
    }

    fn ensure_changed(changed: usize, kind: &'static str, id: i64) -> error::Result<()> {
        if changed == 0 {
            return Err(StateError::NotFound { kind, id });
        }
        Ok(())
    }
}

impl StateBackend for SqliteStateBackend {
    fn create_entity(&self, entity: &NewEntity) -> error::Result<Entity> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO import_entities \
             (bulk_import_id, source_type, source_full_path, source_version, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entity.bulk_import_id,
                entity.source_type,
                entity.source_full_path,
                entity.source_version,
                EntityStatus::Created.as_str(),
            ],
        )
        .map_err(|e| StateError::context("create_entity", e))?;
        Ok(Entity {
            id: EntityId::new(conn.last_insert_rowid()),
            bulk_import_id: entity.bulk_import_id.clone(),
            source_type: entity.source_type.clone(),
            source_full_path: entity.source_full_path.clone(),
            source_version: entity.source_version.clone(),
            status: EntityStatus::Created,
        })
    }

    fn find_entity(
        &self,
        bulk_import_id: &str,
        source_full_path: &str,
    ) -> error::Result<Option<Entity>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM import_entities \
                     WHERE bulk_import_id = ?1 AND source_full_path = ?2"
                ),
                rusqlite::params![bulk_import_id, source_full_path],
                read_entity_row,
            )
            .optional()?;
        row.map(entity_from_row).transpose()
    }

    fn get_entity(&self, id: EntityId) -> error::Result<Entity> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM import_entities WHERE id = ?1"),
                [id.get()],
                read_entity_row,
            )
            .optional()?
            .ok_or(StateError::NotFound {
                kind: "entity",
                id: id.get(),
            })?;
        entity_from_row(row)
    }

    fn list_entities(&self, bulk_import_id: &str) -> error::Result<Vec<Entity>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM import_entities \
             WHERE bulk_import_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([bulk_import_id], read_entity_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(entity_from_row).collect()
    }

    fn set_entity_status(&self, id: EntityId, status: EntityStatus) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE import_entities SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.as_str(), Self::now_sqlite(), id.get()],
        )?;
        Self::ensure_changed(changed, "entity", id.get())
    }

    fn ensure_tracker(&self, entity: EntityId, pipeline: &PipelineName) -> error::Result<Tracker> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO import_trackers (entity_id, pipeline, status) \
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                entity.get(),
                pipeline.as_str(),
                TrackerStatus::Enqueued.as_str()
            ],
        )
        .map_err(|e| StateError::context("ensure_tracker", e))?;
        let row = conn.query_row(
            &format!(
                "SELECT {TRACKER_COLUMNS} FROM import_trackers \
                 WHERE entity_id = ?1 AND pipeline = ?2"
            ),
            rusqlite::params![entity.get(), pipeline.as_str()],
            read_tracker_row,
        )?;
        tracker_from_row(row)
    }

    fn get_tracker(&self, id: TrackerId) -> error::Result<Tracker> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {TRACKER_COLUMNS} FROM import_trackers WHERE id = ?1"),
                [id.get()],
                read_tracker_row,
            )
            .optional()?
            .ok_or(StateError::NotFound {
                kind: "tracker",
                id: id.get(),
            })?;
        tracker_from_row(row)
    }

    fn list_trackers(&self, entity: EntityId) -> error::Result<Vec<Tracker>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRACKER_COLUMNS} FROM import_trackers WHERE entity_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([entity.get()], read_tracker_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(tracker_from_row).collect()
    }

    fn set_tracker_status(&self, id: TrackerId, status: TrackerStatus) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE import_trackers SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.as_str(), Self::now_sqlite(), id.get()],
        )?;
        Self::ensure_changed(changed, "tracker", id.get())
    }

    fn update_tracker_page(
        &self,
        id: TrackerId,
        has_next_page: bool,
        next_page: Option<&str>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE import_trackers SET has_next_page = ?1, next_page = ?2, updated_at = ?3 \
             WHERE id = ?4",
            rusqlite::params![has_next_page, next_page, Self::now_sqlite(), id.get()],
        )?;
        Self::ensure_changed(changed, "tracker", id.get())
    }

    fn increment_retry_count(&self, id: TrackerId) -> error::Result<u32> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE import_trackers SET retry_count = retry_count + 1 WHERE id = ?1",
            [id.get()],
        )?;
        Self::ensure_changed(changed, "tracker", id.get())?;
        let count: i64 = conn.query_row(
            "SELECT retry_count FROM import_trackers WHERE id = ?1",
            [id.get()],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn insert_failure(&self, record: &FailureRecord) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO import_failures \
             (entity_id, pipeline_class, pipeline_step, step_class, exception_class, \
              exception_message, correlation_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.entity_id.get(),
                record.pipeline_class.as_str(),
                record.pipeline_step.as_str(),
                record.step_class,
                record.exception_class,
                record.exception_message,
                record.correlation_id,
                Self::iso8601_to_sqlite(record.created_at.as_str()),
            ],
        )
        .map_err(|e| StateError::context("insert_failure", e))?;
        Ok(conn.last_insert_rowid())
    }

    fn list_failures(&self, entity: EntityId) -> error::Result<Vec<FailureRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT pipeline_class, pipeline_step, step_class, exception_class, \
             exception_message, correlation_id, created_at \
             FROM import_failures WHERE entity_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([entity.get()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(pipeline, step, step_class, class, message, correlation_id, created_at)|
                 -> error::Result<FailureRecord> {
                    Ok(FailureRecord {
                        entity_id: entity,
                        pipeline_class: PipelineName::new(pipeline),
                        pipeline_step: step.parse()?,
                        step_class,
                        exception_class: class,
                        exception_message: message,
                        correlation_id,
                        created_at: Timestamp::new(Self::sqlite_to_iso8601(&created_at)),
                    })
                },
            )
            .collect()
    }
}

impl ProcessedCache for SqliteStateBackend {
    fn is_processed(&self, key: &str, index: u64) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_entries WHERE cache_key = ?1 AND entry_index = ?2",
                rusqlite::params![key, index_to_sql(index)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_processed(&self, key: &str, index: u64) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO processed_entries (cache_key, entry_index) VALUES (?1, ?2)",
            rusqlite::params![key, index_to_sql(index)],
        )
        .map_err(|e| StateError::context("mark_processed", e))?;
        Ok(())
    }

    fn processed_indices(&self, key: &str) -> error::Result<BTreeSet<u64>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT entry_index FROM processed_entries WHERE cache_key = ?1 ORDER BY entry_index",
        )?;
        let indices = stmt
            .query_map([key], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(indices
            .into_iter()
            .filter_map(|i| u64::try_from(i).ok())
            .collect())
    }
}

fn index_to_sql(index: u64) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}
