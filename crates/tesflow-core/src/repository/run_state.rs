//! Run-state repository trait.
//!
//! A run is persisted as two documents: the `WorkflowRun` (status, context
//! snapshot, per-task states), rewritten after every transition, and the
//! definition it executes, written once so the run can be resumed.

use tesflow_types::error::RepositoryError;
use tesflow_types::run::WorkflowRun;
use tesflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Storage for workflow runs.
///
/// Uses native async fn in traits (no async_trait macro).
pub trait RunStateRepository: Send + Sync {
    /// Upsert the full run state.
    fn save_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Store the definition a run executes.
    fn save_definition(
        &self,
        run_id: &Uuid,
        definition: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load_definition(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// All stored runs, most recently started first.
    fn list_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Delete a run and its definition. Returns `true` if it existed.
    fn delete_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
