//! Per-run shared state: the live `WorkflowRun`, the tool registry, the
//! concurrency permits, and the cancellation token.
//!
//! Every task transition goes through a `RunScope` recorder, which updates
//! the in-memory run, publishes the matching event, and checkpoints.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tesflow_types::event::WorkflowEvent;
use tesflow_types::run::{TaskState, TaskStatus, WorkflowRun};
use tesflow_types::workflow::TaskNode;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::run_state::RunStateRepository;
use crate::tool::ToolRegistry;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::VariableContext;
use super::definition::WorkflowError;

/// Outcome of running one node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node's raw result.
    Succeeded(Value),
    Failed { tolerated: bool },
    Skipped,
}

/// Limits resolved from the definition and engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub default_timeout: Duration,
    pub max_loop_iterations: usize,
}

pub struct RunScope<R: RunStateRepository> {
    pub run_id: Uuid,
    run: Mutex<WorkflowRun>,
    root: VariableContext,
    checkpoint: Arc<CheckpointManager<R>>,
    events: EventBus,
    pub(crate) tools: ToolRegistry,
    pub(crate) permits: Arc<Semaphore>,
    cancel: CancellationToken,
    pub(crate) limits: RunLimits,
    first_error: Mutex<Option<String>>,
}

impl<R: RunStateRepository> RunScope<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run: WorkflowRun,
        root: VariableContext,
        checkpoint: Arc<CheckpointManager<R>>,
        events: EventBus,
        tools: ToolRegistry,
        max_concurrency: usize,
        cancel: CancellationToken,
        limits: RunLimits,
    ) -> Self {
        Self {
            run_id: run.id,
            run: Mutex::new(run),
            root,
            checkpoint,
            events,
            tools,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            cancel,
            limits,
            first_error: Mutex::new(None),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn root_context(&self) -> &VariableContext {
        &self.root
    }

    /// Message of the first intolerant failure, if any.
    pub fn first_error(&self) -> Option<String> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clone of the current run state, with a fresh context snapshot.
    pub fn snapshot(&self) -> WorkflowRun {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner).clone();
        run.context = self.root.snapshot();
        run
    }

    /// Mutate the live run.
    pub fn with_run<T>(&self, f: impl FnOnce(&mut WorkflowRun) -> T) -> T {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut run)
    }

    fn update_task(&self, id: &str, f: impl FnOnce(&mut TaskState)) {
        self.with_run(|run| f(run.tasks.entry(id.to_string()).or_default()));
    }

    fn publish(&self, event: WorkflowEvent) {
        self.events.publish(event);
    }

    /// Persist the current state.
    pub async fn persist(&self) -> Result<(), CheckpointError> {
        self.checkpoint.checkpoint_run(|| self.snapshot()).await
    }

    // -----------------------------------------------------------------------
    // Transition recorders
    // -----------------------------------------------------------------------

    pub async fn task_started(&self, node: &TaskNode) -> Result<(), CheckpointError> {
        self.update_task(&node.id, |state| {
            *state = TaskState {
                status: TaskStatus::Running,
                started_at: Some(Utc::now()),
                ..TaskState::default()
            };
        });
        tracing::debug!(run_id = %self.run_id, task_id = %node.id, node_type = node.node_type().as_str(), "task started");
        self.publish(WorkflowEvent::TaskStarted {
            run_id: self.run_id,
            task_id: node.id.clone(),
            node_type: node.node_type().as_str().to_string(),
        });
        self.persist().await
    }

    pub fn record_attempt(&self, task_id: &str, attempt: u32) {
        self.update_task(task_id, |state| state.attempts = attempt);
    }

    /// Publishes the retry and checkpoints the attempt count before the
    /// backoff delay starts.
    pub async fn task_retrying(
        &self,
        task_id: &str,
        attempt: u32,
        delay: Duration,
        error: &WorkflowError,
    ) -> Result<(), CheckpointError> {
        tracing::warn!(
            run_id = %self.run_id,
            task_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "task attempt failed, retrying"
        );
        self.publish(WorkflowEvent::TaskRetrying {
            run_id: self.run_id,
            task_id: task_id.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: error.to_string(),
        });
        self.persist().await
    }

    pub async fn task_succeeded(
        &self,
        node: &TaskNode,
        result: Value,
        started: Instant,
    ) -> Result<(), CheckpointError> {
        let attempts = self.with_run(|run| {
            let state = run.tasks.entry(node.id.clone()).or_default();
            state.status = TaskStatus::Succeeded;
            state.result = Some(result);
            state.error = None;
            state.finished_at = Some(Utc::now());
            state.attempts
        });
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(run_id = %self.run_id, task_id = %node.id, attempts, duration_ms, "task succeeded");
        self.publish(WorkflowEvent::TaskSucceeded {
            run_id: self.run_id,
            task_id: node.id.clone(),
            attempts,
            duration_ms,
        });
        self.persist().await
    }

    pub async fn task_failed(&self, node: &TaskNode, error: &WorkflowError) -> Result<(), CheckpointError> {
        let tolerated = node.continue_on_error;
        self.update_task(&node.id, |state| {
            state.status = TaskStatus::Failed;
            state.error = Some(error.to_task_error());
            state.tolerated = tolerated;
            state.finished_at = Some(Utc::now());
        });
        if tolerated {
            tracing::warn!(run_id = %self.run_id, task_id = %node.id, error = %error, "task failed (continue_on_error)");
        } else {
            tracing::error!(run_id = %self.run_id, task_id = %node.id, error = %error, "task failed");
            let mut first = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
            first.get_or_insert_with(|| format!("task '{}' failed: {error}", node.id));
        }
        self.publish(WorkflowEvent::TaskFailed {
            run_id: self.run_id,
            task_id: node.id.clone(),
            error: error.to_string(),
            tolerated,
        });
        self.persist().await
    }

    /// Mark `node` and everything nested inside it as skipped.
    pub async fn task_skipped(&self, node: &TaskNode, reason: &str) -> Result<(), CheckpointError> {
        self.mark_skipped(node, reason);
        self.persist().await
    }

    /// Mark several subtrees skipped with a single checkpoint.
    pub async fn tasks_skipped(&self, nodes: &[&TaskNode], reason: &str) -> Result<(), CheckpointError> {
        if nodes.is_empty() {
            return Ok(());
        }
        for node in nodes {
            self.mark_skipped(node, reason);
        }
        self.persist().await
    }

    fn mark_skipped(&self, node: &TaskNode, reason: &str) {
        for n in node.descendants() {
            self.update_task(&n.id, |state| {
                *state = TaskState {
                    status: TaskStatus::Skipped,
                    skip_reason: Some(reason.to_string()),
                    finished_at: Some(Utc::now()),
                    ..TaskState::default()
                };
            });
            tracing::debug!(run_id = %self.run_id, task_id = %n.id, reason, "task skipped");
            self.publish(WorkflowEvent::TaskSkipped {
                run_id: self.run_id,
                task_id: n.id.clone(),
                reason: reason.to_string(),
            });
        }
    }
}
