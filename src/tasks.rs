//! Background task tracking.
//!
//! Work the engine finishes after answering the caller — the
//! post-provisioning pipeline, monitoring refreshes after deletes — is
//! spawned through the runner, which keeps a record per task so outcomes
//! stay observable instead of vanishing into detached futures.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ControlResult;
use crate::types::ClusterId;

/// Unique identifier for a background task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new unique task ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Still running.
    Running,
    /// Finished cleanly.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Whether the task has finished either way.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Record of one background task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Task identifier.
    pub id: TaskId,
    /// What the task does, e.g. `post-provision`.
    pub label: String,
    /// Cluster the task works on, when it is cluster-scoped.
    pub cluster: Option<ClusterId>,
    /// When the task was spawned.
    pub started_at: DateTime<Utc>,
    /// When the task finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Success summary or failure detail.
    pub detail: Option<String>,
}

/// Spawns background work and records every outcome.
#[derive(Default)]
pub struct TaskRunner {
    records: Arc<DashMap<TaskId, TaskRecord>>,
    handles: DashMap<TaskId, JoinHandle<()>>,
}

impl TaskRunner {
    /// Create an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn recorded background work.
    ///
    /// The future's `Ok` string becomes the success detail of the record;
    /// its error becomes the failure detail.
    pub fn spawn<F>(&self, label: impl Into<String>, cluster: Option<ClusterId>, work: F) -> TaskId
    where
        F: Future<Output = ControlResult<String>> + Send + 'static,
    {
        let id = TaskId::generate();
        let label = label.into();
        self.records.insert(
            id.clone(),
            TaskRecord {
                id: id.clone(),
                label: label.clone(),
                cluster,
                started_at: Utc::now(),
                finished_at: None,
                status: TaskStatus::Running,
                detail: None,
            },
        );

        let records = Arc::clone(&self.records);
        let task_id = id.clone();
        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            let outcome = work.await;
            let Some(mut record) = records.get_mut(&task_id) else {
                return;
            };
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok(detail) => {
                    record.status = TaskStatus::Succeeded;
                    record.detail = Some(detail);
                    debug!(task = %task_id, label = %task_label, "background task finished");
                }
                Err(err) => {
                    record.status = TaskStatus::Failed;
                    record.detail = Some(err.to_string());
                    warn!(
                        task = %task_id,
                        label = %task_label,
                        error = %err,
                        "background task failed"
                    );
                }
            }
        });
        self.handles.insert(id.clone(), handle);

        debug!(task = %id, label = %label, "background task spawned");
        id
    }

    /// The record of one task.
    #[must_use]
    pub fn record(&self, id: &TaskId) -> Option<TaskRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// All task records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    /// How many tasks are still running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.status == TaskStatus::Running)
            .count()
    }

    /// Wait for every spawned task to finish.
    ///
    /// Tasks that panicked are marked failed here; their own completion
    /// update never ran.
    pub async fn drain(&self) {
        loop {
            let ids: Vec<TaskId> = self.handles.iter().map(|entry| entry.key().clone()).collect();
            if ids.is_empty() {
                return;
            }
            for id in ids {
                let Some((_, handle)) = self.handles.remove(&id) else {
                    continue;
                };
                if let Err(err) = handle.await {
                    if let Some(mut record) = self.records.get_mut(&id) {
                        record.status = TaskStatus::Failed;
                        record.finished_at.get_or_insert_with(Utc::now);
                        record.detail = Some(format!("task aborted: {err}"));
                    }
                    warn!(task = %id, error = %err, "background task aborted");
                }
            }
        }
    }
}
