//! Filesystem run-state store.
//!
//! Directory layout:
//! ```text
//! {root}/
//!   {run_id}/
//!     state.json        # WorkflowRun, rewritten after every transition
//!     definition.json   # WorkflowDefinition, written once per run
//! ```
//!
//! `state.json` is replaced atomically: the new content is written to a
//! sibling temp file which is then renamed over the old one, so a crash
//! mid-write never leaves a truncated state behind.

use std::path::{Path, PathBuf};

use tesflow_core::repository::RunStateRepository;
use tesflow_types::error::RepositoryError;
use tesflow_types::run::WorkflowRun;
use tesflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

const STATE_FILE: &str = "state.json";
const DEFINITION_FILE: &str = "definition.json";

/// Run store rooted at a state directory (`.workflow_state` by default).
#[derive(Debug, Clone)]
pub struct FsRunStore {
    root: PathBuf,
}

impl FsRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{run_id}/`
    pub fn run_dir(&self, run_id: &Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    pub fn state_path(&self, run_id: &Uuid) -> PathBuf {
        self.run_dir(run_id).join(STATE_FILE)
    }

    pub fn definition_path(&self, run_id: &Uuid) -> PathBuf {
        self.run_dir(run_id).join(DEFINITION_FILE)
    }

    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), RepositoryError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(storage)?;
        tokio::fs::rename(&tmp, path).await.map_err(storage)
    }

    /// Read and deserialize a JSON file; `Ok(None)` when it does not exist.
    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, RepositoryError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RepositoryError::Serialization(format!("{}: {e}", path.display())))
    }
}

fn storage(err: std::io::Error) -> RepositoryError {
    RepositoryError::Storage(err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec_pretty(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

impl RunStateRepository for FsRunStore {
    async fn save_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let bytes = to_json(run)?;
        self.write_atomic(&self.state_path(&run.id), bytes).await?;
        tracing::trace!(run_id = %run.id, "wrote run state");
        Ok(())
    }

    async fn load_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Self::read_json(&self.state_path(run_id)).await
    }

    async fn save_definition(
        &self,
        run_id: &Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<(), RepositoryError> {
        let bytes = to_json(definition)?;
        self.write_atomic(&self.definition_path(run_id), bytes).await
    }

    async fn load_definition(
        &self,
        run_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Self::read_json(&self.definition_path(run_id)).await
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage(err)),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage)? {
            let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            match self.load_run(&run_id).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(run_id = %run_id, error = %err, "skipping unreadable run state");
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn delete_run(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        match tokio::fs::remove_dir_all(self.run_dir(run_id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use tesflow_core::workflow::definition::parse_workflow_yaml;
    use tesflow_types::run::{RunStatus, TaskState, TaskStatus};
    use tempfile::TempDir;

    fn sample_run() -> WorkflowRun {
        let mut context = Map::new();
        context.insert("input".to_string(), json!({"n": 1}));
        let mut run = WorkflowRun::new("sample", context);
        run.status = RunStatus::Running;
        run.tasks.insert(
            "a".to_string(),
            TaskState {
                status: TaskStatus::Succeeded,
                attempts: 1,
                result: Some(json!([1, 2])),
                ..TaskState::default()
            },
        );
        run
    }

    #[tokio::test]
    async fn save_and_load_run() {
        let tmp = TempDir::new().unwrap();
        let store = FsRunStore::new(tmp.path());
        let run = sample_run();

        store.save_run(&run).await.unwrap();
        assert!(store.state_path(&run.id).exists());
        assert!(!store.state_path(&run.id).with_extension("json.tmp").exists());

        let loaded = store.load_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn save_run_overwrites_previous_state() {
        let tmp = TempDir::new().unwrap();
        let store = FsRunStore::new(tmp.path());
        let mut run = sample_run();

        store.save_run(&run).await.unwrap();
        run.status = RunStatus::Succeeded;
        store.save_run(&run).await.unwrap();

        let loaded = store.load_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn load_missing_run_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FsRunStore::new(tmp.path());
        assert!(store.load_run(&Uuid::now_v7()).await.unwrap().is_none());
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_state_is_serialization_error() {
        let tmp = TempDir::new().unwrap();
        let store = FsRunStore::new(tmp.path());
        let id = Uuid::now_v7();
        tokio::fs::create_dir_all(store.run_dir(&id)).await.unwrap();
        tokio::fs::write(store.state_path(&id), "{ not json").await.unwrap();

        let err = store.load_run(&id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Serialization(_)));
        // Listing skips the unreadable run instead of failing.
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn definition_round_trips_through_disk() {
        let tmp = TempDir::new().unwrap();
        let store = FsRunStore::new(tmp.path());
        let def = parse_workflow_yaml(
            r#"
name: stored
tasks:
  - id: each
    type: loop
    loop_type: for
    collection: "${items}"
    body:
      - { id: work, tool: echo, retry: { max_attempts: 2 } }
"#,
        )
        .unwrap();
        let id = Uuid::now_v7();

        store.save_definition(&id, &def).await.unwrap();
        let loaded = store.load_definition(&id).await.unwrap().unwrap();
        assert_eq!(loaded, def);
    }

    #[tokio::test]
    async fn list_runs_newest_first_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = FsRunStore::new(tmp.path());
        let older = sample_run();
        let mut newer = sample_run();
        newer.started_at = older.started_at + chrono_offset();
        store.save_run(&older).await.unwrap();
        store.save_run(&newer).await.unwrap();
        tokio::fs::create_dir_all(tmp.path().join("not-a-run")).await.unwrap();

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        assert!(store.delete_run(&older.id).await.unwrap());
        assert!(!store.delete_run(&older.id).await.unwrap());
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
    }

    fn chrono_offset() -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(5)
    }
}
