// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! The split matters for callers: `Configuration` and `CyclicDependency`
//! are fatal and reported before anything executes, while `RunAction` and
//! `TargetMaterialization` are scoped to a single task instance and never
//! abort independent branches.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad or missing configuration: unknown city, missing parameter,
    /// invalid `[pipeline]` values. Raised before any execution.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The dependency graph is not a DAG. Raised during graph resolution,
    /// before any execution. The message names the cycle.
    #[error("cycle detected in task graph: {0}")]
    CyclicDependency(String),

    /// A run action failed (network, malformed payload, subprocess exit,
    /// bad row). Local to one task instance.
    #[error("task '{task}' failed: {source}")]
    RunAction {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    /// A run action reported success but its target is not visible. The
    /// instance is treated as failed so the next invocation retries it.
    #[error("task '{task}' completed but its target was not materialized")]
    TargetMaterialization { task: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
