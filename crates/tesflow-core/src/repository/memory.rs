//! In-process run store, used when persistence is disabled and in tests.

use dashmap::DashMap;
use tesflow_types::error::RepositoryError;
use tesflow_types::run::WorkflowRun;
use tesflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::run_state::RunStateRepository;

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: DashMap<Uuid, WorkflowRun>,
    definitions: DashMap<Uuid, WorkflowDefinition>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl RunStateRepository for InMemoryRunStore {
    async fn save_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn save_definition(
        &self,
        run_id: &Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<(), RepositoryError> {
        self.definitions.insert(*run_id, definition.clone());
        Ok(())
    }

    async fn load_definition(
        &self,
        run_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.get(run_id).map(|d| d.value().clone()))
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs: Vec<WorkflowRun> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn delete_run(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        self.definitions.remove(run_id);
        Ok(self.runs.remove(run_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn save_load_delete_roundtrip() {
        let store = InMemoryRunStore::new();
        let run = WorkflowRun::new("demo", Map::new());
        store.save_run(&run).await.unwrap();

        assert_eq!(store.load_run(&run.id).await.unwrap(), Some(run.clone()));
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
        assert!(store.delete_run(&run.id).await.unwrap());
        assert!(!store.delete_run(&run.id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_run_is_none() {
        let store = InMemoryRunStore::new();
        assert!(store.load_run(&Uuid::now_v7()).await.unwrap().is_none());
        assert!(store.load_definition(&Uuid::now_v7()).await.unwrap().is_none());
    }
}
