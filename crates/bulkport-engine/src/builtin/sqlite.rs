//! Loader that writes records as JSON text rows into a `SQLite` table.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use bulkport_types::error::StepError;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::context::Context;
use crate::pipeline::Loader;

pub struct SqliteLoader {
    conn: Mutex<Connection>,
    table: String,
    insert_sql: String,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl SqliteLoader {
    /// Open the target database and create `table` if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table created.
    pub fn open(path: &Path, table: &str) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::with_connection(conn, table)
            .with_context(|| format!("Failed to create table {table}"))
    }

    /// # Errors
    ///
    /// Returns an error if the table cannot be created.
    pub fn in_memory(table: &str) -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> rusqlite::Result<Self> {
        let table = quote_ident(table);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL,
                pipeline TEXT NOT NULL,
                record_json TEXT NOT NULL,
                loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
            );"
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
            insert_sql: format!(
                "INSERT INTO {table} (entity_id, pipeline, record_json) VALUES (?1, ?2, ?3)"
            ),
            table,
        })
    }

    #[cfg(test)]
    fn rows(&self) -> Vec<(i64, String, String)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT entity_id, pipeline, record_json FROM {} ORDER BY id",
                self.table
            ))
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }
}

impl std::fmt::Debug for SqliteLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLoader")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl Loader<Value> for SqliteLoader {
    fn name(&self) -> &str {
        "sqlite_loader"
    }

    fn load(&self, ctx: &Context, record: Value) -> Result<(), StepError> {
        let json = serde_json::to_string(&record)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| StepError::internal("sqlite loader lock poisoned"))?;
        conn.execute(
            &self.insert_sql,
            params![ctx.entity.id.get(), ctx.pipeline.as_str(), json],
        )
        .map_err(|e| StepError::load(e.to_string()).with_class("SqliteError"))?;
        Ok(())
    }
}
