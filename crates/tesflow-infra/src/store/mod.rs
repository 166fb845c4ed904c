//! Run-state storage adapters.
//!
//! `RunStore` picks the backend at runtime from `EngineConfig::persist_state`
//! so the engine type stays the same either way.

pub mod filesystem;

use tesflow_core::repository::{InMemoryRunStore, RunStateRepository};
use tesflow_types::config::EngineConfig;
use tesflow_types::error::RepositoryError;
use tesflow_types::run::WorkflowRun;
use tesflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

pub use filesystem::FsRunStore;

#[derive(Debug)]
pub enum RunStore {
    Filesystem(FsRunStore),
    Memory(InMemoryRunStore),
}

impl RunStore {
    /// Filesystem store under `state_dir` when persistence is on, else in-memory.
    pub fn from_config(config: &EngineConfig) -> Self {
        if config.persist_state {
            RunStore::Filesystem(FsRunStore::new(&config.state_dir))
        } else {
            RunStore::Memory(InMemoryRunStore::new())
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, RunStore::Filesystem(_))
    }
}

impl RunStateRepository for RunStore {
    async fn save_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        match self {
            RunStore::Filesystem(store) => store.save_run(run).await,
            RunStore::Memory(store) => store.save_run(run).await,
        }
    }

    async fn load_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        match self {
            RunStore::Filesystem(store) => store.load_run(run_id).await,
            RunStore::Memory(store) => store.load_run(run_id).await,
        }
    }

    async fn save_definition(
        &self,
        run_id: &Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<(), RepositoryError> {
        match self {
            RunStore::Filesystem(store) => store.save_definition(run_id, definition).await,
            RunStore::Memory(store) => store.save_definition(run_id, definition).await,
        }
    }

    async fn load_definition(
        &self,
        run_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        match self {
            RunStore::Filesystem(store) => store.load_definition(run_id).await,
            RunStore::Memory(store) => store.load_definition(run_id).await,
        }
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        match self {
            RunStore::Filesystem(store) => store.list_runs().await,
            RunStore::Memory(store) => store.list_runs().await,
        }
    }

    async fn delete_run(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        match self {
            RunStore::Filesystem(store) => store.delete_run(run_id).await,
            RunStore::Memory(store) => store.delete_run(run_id).await,
        }
    }
}
