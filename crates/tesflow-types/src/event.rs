//! Lifecycle events published on the engine's event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::RunStatus;

/// A state transition inside a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: Uuid,
        workflow_name: String,
        resumed: bool,
    },

    TaskStarted {
        run_id: Uuid,
        task_id: String,
        node_type: String,
    },

    /// An attempt failed and another will follow after `delay_ms`.
    TaskRetrying {
        run_id: Uuid,
        task_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    TaskSucceeded {
        run_id: Uuid,
        task_id: String,
        attempts: u32,
        duration_ms: u64,
    },

    TaskFailed {
        run_id: Uuid,
        task_id: String,
        error: String,
        tolerated: bool,
    },

    TaskSkipped {
        run_id: Uuid,
        task_id: String,
        reason: String,
    },

    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        duration_ms: u64,
    },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::TaskStarted { run_id, .. }
            | WorkflowEvent::TaskRetrying { run_id, .. }
            | WorkflowEvent::TaskSucceeded { run_id, .. }
            | WorkflowEvent::TaskFailed { run_id, .. }
            | WorkflowEvent::TaskSkipped { run_id, .. }
            | WorkflowEvent::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// Task id for task-scoped events.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::TaskStarted { task_id, .. }
            | WorkflowEvent::TaskRetrying { task_id, .. }
            | WorkflowEvent::TaskSucceeded { task_id, .. }
            | WorkflowEvent::TaskFailed { task_id, .. }
            | WorkflowEvent::TaskSkipped { task_id, .. } => Some(task_id),
            WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunFinished { .. } => None,
        }
    }
}
