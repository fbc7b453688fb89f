// src/db.rs

//! SQLite store shared by the marker targets and the run actions.
//!
//! Schema-per-city namespacing is realized as a table-name prefix
//! (`bordeaux_stations`, `bordeaux_timeseries`, ...) since SQLite has no
//! server-side schemas. The marker table is shared and keyed by
//! `(identity, schema)` so marker identity still carries the schema.
//!
//! Every task-scoped write goes through [`Database::commit_with_marker`]:
//! one transaction holding both the data mutation and the marker row.
//! There is no code path that writes a marker separately from its data.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use rusqlite::Connection;
use tracing::debug;

use crate::errors::{PipelineError, Result};

/// Shared handle to the pipeline's SQLite database.
///
/// Cloning is cheap; all clones share one connection behind a mutex. Each
/// write is a single short-lived transaction scoped to one task's
/// materialize step, so the lock is never held across I/O waits.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if missing) the database at `path` and ensure the
    /// marker table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS task_markers (
                 identity TEXT NOT NULL,
                 schema   TEXT NOT NULL,
                 updated  TEXT NOT NULL DEFAULT (datetime('now')),
                 PRIMARY KEY (identity, schema)
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create the per-city tables the pipeline writes into. The
    /// `<schema>_raw_stations` and `<schema>_stations` tables are owned by
    /// the loader subprocess and the normalize step respectively.
    pub fn init_city_tables(&self, schema: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {schema}_timeseries (
                 id INTEGER NOT NULL,
                 timestamp TEXT NOT NULL,
                 available_stands INTEGER NOT NULL,
                 available_bikes INTEGER NOT NULL,
                 status TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS {schema}_transactions (
                 id INTEGER NOT NULL,
                 number REAL NOT NULL,
                 date TEXT NOT NULL
             );"
        );
        self.with_conn(|conn| conn.execute_batch(&sql))?;
        Ok(())
    }

    /// True if a marker row exists for `(identity, schema)`.
    pub fn marker_exists(&self, identity: &str, schema: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT 1 FROM task_markers WHERE identity = ?1 AND schema = ?2",
            )?;
            stmt.exists([identity, schema])
        })
    }

    /// Run `mutate` and write the `(identity, schema)` marker row in a
    /// single transaction.
    ///
    /// Either both the data mutation and the marker commit, or neither
    /// does; a failure inside `mutate` rolls everything back and the
    /// target stays "does not exist".
    pub fn commit_with_marker<F>(&self, identity: &str, schema: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> anyhow::Result<()>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| PipelineError::Other(anyhow!("database mutex poisoned")))?;

        let tx = guard.transaction()?;
        mutate(&tx)?;
        tx.execute(
            "INSERT OR REPLACE INTO task_markers (identity, schema, updated)
             VALUES (?1, ?2, datetime('now'))",
            [identity, schema],
        )?;
        tx.commit()?;

        debug!(identity, schema, "marker committed with data mutation");
        Ok(())
    }

    /// Run a read-only (or single-statement) operation against the
    /// connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| PipelineError::Other(anyhow!("database mutex poisoned")))?;
        Ok(f(&guard)?)
    }
}
