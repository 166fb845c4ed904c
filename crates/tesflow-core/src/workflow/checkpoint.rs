//! Durable checkpoints of run state.
//!
//! Wraps a `RunStateRepository` so the engine can persist the whole
//! `WorkflowRun` after every transition. Writes are serialized: a snapshot
//! is taken only once the previous write has finished, so a slower write of
//! an older snapshot can never overwrite a newer one.

use tesflow_types::run::WorkflowRun;
use tesflow_types::workflow::WorkflowDefinition;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::run_state::RunStateRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: RunStateRepository` so it works with the filesystem
/// store or the in-memory one.
pub struct CheckpointManager<R: RunStateRepository> {
    repo: R,
    write_lock: Mutex<()>,
}

impl<R: RunStateRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Persist the snapshot produced by `snapshot`, taken after any earlier
    /// checkpoint write has completed.
    pub async fn checkpoint_run<F>(&self, snapshot: F) -> Result<(), CheckpointError>
    where
        F: FnOnce() -> WorkflowRun,
    {
        let _guard = self.write_lock.lock().await;
        let run = snapshot();
        self.repo
            .save_run(&run)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::trace!(run_id = %run.id, status = %run.status, "checkpointed run");
        Ok(())
    }

    /// Store the definition a run executes, for later resume.
    pub async fn checkpoint_definition(
        &self,
        run_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<(), CheckpointError> {
        self.repo
            .save_definition(&run_id, definition)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(run_id = %run_id, workflow = %definition.name, "checkpointed definition");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery helpers
    // -----------------------------------------------------------------------

    /// Load a run and its definition for resumption.
    pub async fn restore(
        &self,
        run_id: Uuid,
    ) -> Result<(WorkflowRun, WorkflowDefinition), CheckpointError> {
        let run = self
            .repo
            .load_run(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::RunNotFound(run_id))?;
        let definition = self
            .repo
            .load_definition(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::DefinitionNotFound(run_id))?;
        Ok((run, definition))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// The run exists but its definition was never stored.
    #[error("no stored definition for run {0}")]
    DefinitionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRunStore;
    use serde_json::Map;
    use tesflow_types::run::RunStatus;
    use tesflow_types::workflow::TaskNode;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "demo".to_string(),
            description: None,
            execution: Default::default(),
            max_concurrency: None,
            timeout_secs: None,
            max_loop_iterations: None,
            variables: Map::new(),
            tasks: vec![TaskNode::task("a", "echo")],
        }
    }

    #[tokio::test]
    async fn checkpoint_then_restore() {
        let manager = CheckpointManager::new(InMemoryRunStore::new());
        let mut run = WorkflowRun::new("demo", Map::new());
        run.status = RunStatus::Running;

        manager.checkpoint_definition(run.id, &definition()).await.unwrap();
        let snapshot = run.clone();
        manager.checkpoint_run(move || snapshot).await.unwrap();

        let (restored, def) = manager.restore(run.id).await.unwrap();
        assert_eq!(restored.status, RunStatus::Running);
        assert_eq!(def.tasks.len(), 1);
    }

    #[tokio::test]
    async fn restore_unknown_run_fails() {
        let manager = CheckpointManager::new(InMemoryRunStore::new());
        let err = manager.restore(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn restore_without_definition_fails() {
        let manager = CheckpointManager::new(InMemoryRunStore::new());
        let run = WorkflowRun::new("demo", Map::new());
        let id = run.id;
        manager.checkpoint_run(move || run).await.unwrap();
        let err = manager.restore(id).await.unwrap_err();
        assert!(matches!(err, CheckpointError::DefinitionNotFound(_)));
    }

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
        assert!(CheckpointError::RunNotFound(Uuid::nil()).to_string().contains("not found"));
    }
}
