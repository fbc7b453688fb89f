// src/engine/mod.rs

//! Execution engine.
//!
//! Split in two: a pure synchronous state machine
//! ([`scheduler::Scheduler`]) that owns all state transitions, and an
//! async [`runtime::Runtime`] that reacts to completion events, skips
//! tasks whose target already exists, and dispatches the rest to a
//! bounded worker pool through the [`runner::TaskRunner`] trait.

pub mod runner;
pub mod runtime;
pub mod scheduler;

pub use runner::{RunFuture, TaskRunner};
pub use runtime::{Runtime, RuntimeEvent, RuntimeOptions};
pub use scheduler::{RunReport, RunState, Scheduler, TaskOutcome, TaskStatus};
