// src/engine/runner.rs

//! Pluggable run-action execution.
//!
//! The runtime talks to a [`TaskRunner`] instead of invoking the
//! per-city adapters directly. Production code uses
//! [`PipelineRunner`](crate::actions::PipelineRunner); tests provide
//! their own implementation that records invocations and fabricates
//! outcomes without touching the network or spawning processes.

use std::future::Future;
use std::pin::Pin;

use crate::task::TaskSpec;

pub type RunFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// One run-action invocation for a claimed task instance.
///
/// The implementation receives the full spec (identity, resolved
/// parameters, target) and must materialize the target before returning
/// `Ok`; the runtime re-checks target existence afterwards and treats a
/// missing target as a materialization failure.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, spec: TaskSpec) -> RunFuture;
}
