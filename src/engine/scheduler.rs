// src/engine/scheduler.rs

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::dag::TaskGraph;
use crate::task::TaskId;

/// Per-instance state over one pipeline invocation.
///
/// `Pending -> (Skipped | Running -> (Done | Failed))`; `UpstreamFailed`
/// for never-started dependents of a failure, `Cancelled` for
/// never-started tasks after a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies.
    Pending,
    /// Claimed for execution (in flight or waiting for a worker slot).
    Running,
    /// Target already existed; the run action was not invoked.
    Skipped,
    /// Run action succeeded and the target is visible.
    Done,
    /// Run action failed, or its target was not materialized.
    Failed,
    /// Never started because a transitive dependency failed.
    UpstreamFailed,
    /// Never started because the invocation was cancelled.
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }

    /// Does this state satisfy a dependent's dependency check?
    fn satisfies_dependents(self) -> bool {
        matches!(self, RunState::Done | RunState::Skipped)
    }
}

/// Result of one run-action invocation, as reported to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(String),
}

/// Terminal status of one instance in the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub state: RunState,
    pub error: Option<String>,
}

/// Per-instance terminal status map for one invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tasks: BTreeMap<TaskId, TaskStatus>,
}

impl RunReport {
    /// True when no instance failed; skipped and done both count as
    /// success, cancelled does not count as failure.
    pub fn is_success(&self) -> bool {
        !self
            .tasks
            .values()
            .any(|s| matches!(s.state, RunState::Failed | RunState::UpstreamFailed))
    }

    pub fn count(&self, state: RunState) -> usize {
        self.tasks.values().filter(|s| s.state == state).count()
    }
}

/// The per-invocation state machine.
///
/// The scheduler owns every transition; the runtime merely feeds it
/// events. Claiming via [`Scheduler::claim_ready`] is the single-flight
/// point: an identity leaves `Pending` exactly once, so overlapping root
/// sets converge on one execution per instance.
pub struct Scheduler {
    graph: TaskGraph,
    states: HashMap<TaskId, RunState>,
    errors: HashMap<TaskId, String>,
}

impl Scheduler {
    pub fn new(graph: TaskGraph) -> Self {
        let states = graph
            .order()
            .iter()
            .map(|id| (id.clone(), RunState::Pending))
            .collect();
        Self {
            graph,
            states,
            errors: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn state(&self, id: &TaskId) -> Option<RunState> {
        self.states.get(id).copied()
    }

    /// No instance is pending or in flight.
    pub fn is_idle(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    pub fn running_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, RunState::Running))
            .count()
    }

    /// Claim every pending instance whose dependencies are all satisfied,
    /// transitioning it to `Running`.
    ///
    /// Decide first, then mutate: candidates are collected against a
    /// consistent snapshot, then claimed. A claimed id is never handed
    /// out again.
    pub fn claim_ready(&mut self) -> Vec<TaskId> {
        let candidates: Vec<TaskId> = self
            .graph
            .order()
            .iter()
            .filter(|id| {
                self.states.get(*id) == Some(&RunState::Pending) && self.deps_satisfied(id)
            })
            .cloned()
            .collect();

        for id in &candidates {
            debug!(task = %id, "dependencies satisfied; claiming for execution");
            self.states.insert(id.clone(), RunState::Running);
        }

        candidates
    }

    fn deps_satisfied(&self, id: &TaskId) -> bool {
        self.graph.dependencies_of(id).iter().all(|dep| {
            self.states
                .get(dep)
                .copied()
                .is_some_and(RunState::satisfies_dependents)
        })
    }

    /// A claimed instance's target already existed: transition to
    /// `Skipped` without invoking the run action. Skipped counts as
    /// satisfied for dependents.
    pub fn mark_skipped(&mut self, id: &TaskId) {
        self.transition_from_running(id, RunState::Skipped);
    }

    /// Fold a run-action outcome into the state machine. On failure, all
    /// transitive dependents that have not started are marked
    /// `UpstreamFailed`, distinct from `Failed`, so failure causes stay
    /// distinguishable.
    pub fn handle_completion(&mut self, id: &TaskId, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Success => {
                self.transition_from_running(id, RunState::Done);
            }
            TaskOutcome::Failed(error) => {
                warn!(task = %id, error = %error, "task failed; failing dependents");
                self.errors.insert(id.clone(), error);
                self.transition_from_running(id, RunState::Failed);
                self.mark_dependents_upstream_failed(id);
            }
        }
    }

    fn transition_from_running(&mut self, id: &TaskId, to: RunState) {
        match self.states.get(id) {
            Some(RunState::Running) => {
                debug!(task = %id, state = ?to, "task transition");
                self.states.insert(id.clone(), to);
            }
            other => {
                // Either an unknown id or a duplicate completion; both
                // indicate a runtime bug, not a task failure.
                warn!(task = %id, state = ?other, "ignoring transition for non-running task");
            }
        }
    }

    fn mark_dependents_upstream_failed(&mut self, failed: &TaskId) {
        let mut stack = self.graph.dependents_of(failed);

        while let Some(id) = stack.pop() {
            if self.states.get(&id) == Some(&RunState::Pending) {
                debug!(task = %id, "upstream failure; will not start");
                self.states.insert(id.clone(), RunState::UpstreamFailed);
                stack.extend(self.graph.dependents_of(&id));
            }
        }
    }

    /// Mark every instance that has not started as `Cancelled`. Running
    /// instances are left alone; they run to completion.
    pub fn cancel_pending(&mut self) {
        for (id, state) in self.states.iter_mut() {
            if *state == RunState::Pending {
                debug!(task = %id, "cancelled before start");
                *state = RunState::Cancelled;
            }
        }
    }

    /// Per-instance terminal status map.
    pub fn report(&self) -> RunReport {
        let tasks = self
            .states
            .iter()
            .map(|(id, state)| {
                (
                    id.clone(),
                    TaskStatus {
                        state: *state,
                        error: self.errors.get(id).cloned(),
                    },
                )
            })
            .collect();
        RunReport { tasks }
    }
}
