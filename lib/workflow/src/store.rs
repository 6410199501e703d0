//! Persistence of workflow definitions.
//!
//! The engine only needs to load and save definitions; where they live is
//! up to the host. Two stores are provided: an in-memory map for tests and
//! embedding, and a directory of JSON files (one per workflow, named
//! `{id}.json`) as used by the CLI.

use crate::definition::{Workflow, WorkflowSummary};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use taskflow_core::WorkflowId;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Errors from workflow stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No workflow with this id is stored.
    NotFound { workflow_id: WorkflowId },
    /// The backing storage could not be read or written.
    Io { path: PathBuf, reason: String },
    /// A stored definition could not be parsed.
    Corrupt { path: PathBuf, reason: String },
    /// A definition could not be serialized.
    Serialize {
        workflow_id: WorkflowId,
        reason: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow {workflow_id} not found"),
            Self::Io { path, reason } => write!(f, "I/O error on {}: {reason}", path.display()),
            Self::Corrupt { path, reason } => {
                write!(f, "corrupt workflow file {}: {reason}", path.display())
            }
            Self::Serialize {
                workflow_id,
                reason,
            } => write!(f, "failed to serialize workflow {workflow_id}: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Loads and saves workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a workflow by id.
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, Report<StoreError>>;

    /// Creates or replaces a workflow.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>>;

    /// Removes a workflow. Removing an unknown id is an error.
    async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<(), Report<StoreError>>;

    /// Lists stored workflows ordered by name.
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, Report<StoreError>>;
}

fn sort_summaries(summaries: &mut [WorkflowSummary]) {
    summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

/// Keeps workflows in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, Report<StoreError>> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { workflow_id }.into())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<(), Report<StoreError>> {
        match self.workflows.write().await.remove(&workflow_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound { workflow_id }.into()),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        let mut summaries: Vec<_> = self
            .workflows
            .read()
            .await
            .values()
            .map(Workflow::summary)
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}

/// Keeps one JSON file per workflow in a directory.
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never sees a half-written definition.
#[derive(Debug, Clone)]
pub struct FileWorkflowStore {
    dir: PathBuf,
}

impl FileWorkflowStore {
    /// Creates a store over `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file a workflow is stored in.
    #[must_use]
    pub fn path_for(&self, workflow_id: WorkflowId) -> PathBuf {
        self.dir.join(format!("{workflow_id}.json"))
    }

    async fn read(&self, path: &Path) -> Result<Workflow, StoreError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, &e))?;
        Workflow::import_json(&json).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, Report<StoreError>> {
        let path = self.path_for(workflow_id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => return Err(StoreError::NotFound { workflow_id }.into()),
            Err(e) => return Err(io_error(&path, &e).into()),
        }
        Ok(self.read(&path).await?)
    }

    #[instrument(skip_all, fields(workflow_id = %workflow.id, dir = %self.dir.display()))]
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let json = workflow.export_json().map_err(|e| StoreError::Serialize {
            workflow_id: workflow.id,
            reason: e.to_string(),
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, &e))?;

        let path = self.path_for(workflow.id);
        let tmp = path.with_extension("json.tmp");
        let written = match tokio::fs::write(&tmp, json).await {
            Ok(()) => tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| io_error(&path, &e)),
            Err(e) => Err(io_error(&tmp, &e)),
        };
        if let Err(err) = written {
            match tokio::fs::remove_file(&tmp).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %tmp.display(), error = %e, "failed to remove temporary file"),
            }
            return Err(err.into());
        }
        debug!(path = %path.display(), "saved workflow");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<(), Report<StoreError>> {
        let path = self.path_for(workflow_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound { workflow_id }.into())
            }
            Err(e) => Err(io_error(&path, &e).into()),
        }
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, Report<StoreError>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, &e).into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, &e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(workflow) => summaries.push(workflow.summary()),
                Err(err) => warn!(error = %err, "skipping unreadable workflow file"),
            }
        }
        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WorkflowConnection;
    use crate::node::{ActionConfig, ActionType, WorkflowNode};

    fn sample(name: &str) -> Workflow {
        let mut workflow = Workflow::new(name);
        workflow
            .add_node(WorkflowNode::manual_trigger("start", "Start"))
            .expect("add trigger");
        workflow
            .add_node(WorkflowNode::action(
                "notify",
                "Notify",
                ActionConfig::new(ActionType::Notification),
            ))
            .expect("add action");
        workflow
            .add_connection(WorkflowConnection::between("start", "notify"))
            .expect("connect");
        workflow
    }

    async fn exercise(store: &dyn WorkflowStore) {
        let beta = sample("beta");
        let alpha = sample("alpha");
        store.save_workflow(&beta).await.expect("save beta");
        store.save_workflow(&alpha).await.expect("save alpha");

        let loaded = store.load_workflow(beta.id).await.expect("load");
        assert_eq!(loaded, beta);

        let names: Vec<String> = store
            .list_workflows()
            .await
            .expect("list")
            .into_iter()
            .map(|summary| summary.name)
            .collect();
        assert_eq!(names, ["alpha", "beta"]);

        let mut renamed = beta.clone();
        renamed.rename("gamma");
        store.save_workflow(&renamed).await.expect("overwrite");
        assert_eq!(
            store.load_workflow(beta.id).await.expect("reload").name(),
            "gamma"
        );

        store.delete_workflow(alpha.id).await.expect("delete");
        let err = store.load_workflow(alpha.id).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &StoreError::NotFound {
                workflow_id: alpha.id
            }
        );
        assert!(store.delete_workflow(alpha.id).await.is_err());
        assert_eq!(store.list_workflows().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn in_memory_store() {
        exercise(&InMemoryWorkflowStore::new()).await;
    }

    #[tokio::test]
    async fn file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWorkflowStore::new(dir.path().join("workflows"));
        exercise(&store).await;
    }

    #[tokio::test]
    async fn file_store_lists_nothing_before_first_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWorkflowStore::new(dir.path().join("missing"));
        assert!(store.list_workflows().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWorkflowStore::new(dir.path());
        let workflow = sample("broken");
        store.save_workflow(&workflow).await.expect("save");
        tokio::fs::write(store.path_for(workflow.id), "{ not json")
            .await
            .expect("clobber");

        let err = store.load_workflow(workflow.id).await.unwrap_err();
        assert!(matches!(err.current_context(), StoreError::Corrupt { .. }));
        assert!(store.list_workflows().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn failed_save_removes_temporary_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWorkflowStore::new(dir.path());
        let workflow = sample("blocked");
        let path = store.path_for(workflow.id);
        tokio::fs::create_dir(&path).await.expect("occupy target");

        let err = store.save_workflow(&workflow).await.unwrap_err();

        assert!(matches!(err.current_context(), StoreError::Io { .. }));
        let tmp = path.with_extension("json.tmp");
        assert!(!tokio::fs::try_exists(&tmp).await.expect("stat"));
    }

    #[tokio::test]
    async fn file_store_ignores_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWorkflowStore::new(dir.path());
        tokio::fs::write(dir.path().join("notes.txt"), "hello")
            .await
            .expect("write");
        store.save_workflow(&sample("only")).await.expect("save");

        let listed = store.list_workflows().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].node_count, 2);
    }
}
