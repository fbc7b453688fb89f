// src/target/mod.rs

//! Durable completion evidence for task instances.
//!
//! A target is created only as the side effect of a successful run action
//! and is never deleted by the engine; cleanup / forced re-run is an
//! explicit operator action. The engine checks `exists()` before
//! scheduling and re-checks it defensively after a claimed completion.

pub mod file;
pub mod marker;

pub use file::FileTarget;
pub use marker::MarkerTarget;

use crate::db::Database;
use crate::errors::Result;

/// Completion evidence for one task identity, file- or database-backed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File(FileTarget),
    Marker(MarkerTarget),
}

impl Target {
    /// Fast, side-effect-free completion check.
    ///
    /// A database error while probing a marker is propagated, never
    /// treated as "does not exist": a flaky store must not cause a
    /// completed task to be re-run as if it were the first attempt.
    pub fn exists(&self, db: &Database) -> Result<bool> {
        match self {
            Target::File(f) => Ok(f.exists()),
            Target::Marker(m) => db.marker_exists(&m.identity, &m.schema),
        }
    }

    /// Human-readable location, for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Target::File(f) => format!("file:{}", f.path().display()),
            Target::Marker(m) => format!("marker:{}@{}", m.identity, m.schema),
        }
    }
}
