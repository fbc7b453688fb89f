// src/task/mod.rs

//! Task identity and construction.
//!
//! A unit of work is identified by `(kind, parameter binding)`; two
//! requests with the same identity are the same task. Each kind has a
//! fixed dependency shape and a deterministic target, built in
//! [`spec::TaskSpec::build`] as a closed lookup table rather than an open
//! task-class hierarchy.

pub mod kind;
pub mod params;
pub mod spec;

pub use kind::TaskKind;
pub use params::{TaskId, TaskParams};
pub use spec::TaskSpec;
