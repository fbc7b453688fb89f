// src/engine/runtime.rs

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::dag::TaskGraph;
use crate::db::Database;
use crate::engine::runner::TaskRunner;
use crate::engine::scheduler::{RunReport, Scheduler, TaskOutcome};
use crate::errors::{PipelineError, Result};
use crate::task::TaskId;

/// Events sent into the runtime from workers and external signals.
#[derive(Debug)]
pub enum RuntimeEvent {
    TaskCompleted { id: TaskId, outcome: TaskOutcome },
    ShutdownRequested,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Maximum number of run actions executing concurrently.
    pub workers: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// The orchestration runtime for one invocation.
///
/// Responsibilities:
/// - claim ready instances from the scheduler
/// - skip instances whose target already exists (without running them)
/// - dispatch the rest to spawned workers, bounded by a semaphore
/// - fold `TaskCompleted` events back into the scheduler
/// - stop dispatching (but let in-flight work finish) on shutdown
pub struct Runtime {
    scheduler: Scheduler,
    runner: Arc<dyn TaskRunner>,
    db: Database,
    semaphore: Arc<Semaphore>,

    events_tx: mpsc::Sender<RuntimeEvent>,
    events_rx: mpsc::Receiver<RuntimeEvent>,
    cancelled: bool,
}

impl Runtime {
    pub fn new(
        graph: TaskGraph,
        runner: Arc<dyn TaskRunner>,
        db: Database,
        options: RuntimeOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            scheduler: Scheduler::new(graph),
            runner,
            db,
            semaphore: Arc::new(Semaphore::new(options.workers.max(1))),
            events_tx,
            events_rx,
            cancelled: false,
        }
    }

    /// Sender for external cancellation (e.g. a Ctrl-C handler).
    pub fn shutdown_handle(&self) -> mpsc::Sender<RuntimeEvent> {
        self.events_tx.clone()
    }

    /// Main event loop. Returns the per-instance terminal status map;
    /// failed branches never abort independent ones, so this only errors
    /// on internal channel breakage.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(tasks = self.scheduler.graph().len(), "pipeline run started");

        self.dispatch_ready()?;

        loop {
            let finished = if self.cancelled {
                self.scheduler.running_count() == 0
            } else {
                self.scheduler.is_idle()
            };
            if finished {
                break;
            }

            let Some(event) = self.events_rx.recv().await else {
                // All senders dropped while work was outstanding.
                return Err(PipelineError::Other(anyhow::anyhow!(
                    "runtime event channel closed unexpectedly"
                )));
            };

            match event {
                RuntimeEvent::TaskCompleted { id, outcome } => {
                    debug!(task = %id, ?outcome, "task completed");
                    self.scheduler.handle_completion(&id, outcome);
                    if !self.cancelled {
                        self.dispatch_ready()?;
                    }
                }
                RuntimeEvent::ShutdownRequested => {
                    info!("shutdown requested; not starting new tasks");
                    self.cancelled = true;
                }
            }
        }

        if self.cancelled {
            self.scheduler.cancel_pending();
        }

        let report = self.scheduler.report();
        info!(
            done = report.count(crate::engine::RunState::Done),
            skipped = report.count(crate::engine::RunState::Skipped),
            failed = report.count(crate::engine::RunState::Failed),
            upstream_failed = report.count(crate::engine::RunState::UpstreamFailed),
            "pipeline run finished"
        );
        Ok(report)
    }

    /// Claim ready instances until a fixed point: instances whose target
    /// already exists are skipped in place (which can make their
    /// dependents ready in turn), the rest are dispatched to workers.
    fn dispatch_ready(&mut self) -> Result<()> {
        loop {
            let claimed = self.scheduler.claim_ready();
            if claimed.is_empty() {
                return Ok(());
            }

            for id in claimed {
                let spec = match self.scheduler.graph().spec(&id) {
                    Some(spec) => spec.clone(),
                    None => {
                        // Cannot happen for a graph-built scheduler.
                        warn!(task = %id, "claimed task missing from graph");
                        continue;
                    }
                };

                match spec.target.exists(&self.db) {
                    Ok(true) => {
                        info!(task = %id, target = %spec.target.describe(), "target exists; skipping");
                        self.scheduler.mark_skipped(&id);
                    }
                    Ok(false) => self.spawn_worker(id, spec),
                    Err(err) => {
                        // A failed probe must not look like a fresh run.
                        error!(task = %id, error = %err, "target existence check failed");
                        self.scheduler
                            .handle_completion(&id, TaskOutcome::Failed(err.to_string()));
                    }
                }
            }
        }
    }

    /// Execute one instance on the bounded pool. The worker reports back
    /// over the event channel; it never panics the runtime.
    fn spawn_worker(&self, id: TaskId, spec: crate::task::TaskSpec) {
        info!(task = %id, "dispatching task");

        let runner = Arc::clone(&self.runner);
        let semaphore = Arc::clone(&self.semaphore);
        let db = self.db.clone();
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only fails if
            // the runtime is being torn down; bail quietly in that case.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            let target = spec.target.clone();
            let outcome = match runner.run(spec).await {
                Ok(()) => {
                    // Defensive re-check: success without a visible
                    // target must be retried on the next invocation.
                    match target.exists(&db) {
                        Ok(true) => TaskOutcome::Success,
                        Ok(false) => TaskOutcome::Failed(
                            PipelineError::TargetMaterialization {
                                task: id.to_string(),
                            }
                            .to_string(),
                        ),
                        Err(err) => TaskOutcome::Failed(err.to_string()),
                    }
                }
                Err(source) => TaskOutcome::Failed(
                    PipelineError::RunAction {
                        task: id.to_string(),
                        source,
                    }
                    .to_string(),
                ),
            };

            if events_tx
                .send(RuntimeEvent::TaskCompleted { id, outcome })
                .await
                .is_err()
            {
                // Runtime already gone; nothing left to report to.
            }
        });
    }
}
