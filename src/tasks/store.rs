//! Task persistence.
//!
//! Every write is an upsert-by-id that refuses backward or skipped transitions, so a poller
//! never observes a task moving from `running` back to `queued`, and two workers cannot both
//! claim the same `queued` task.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::downstream::{ErrorKind, GatewayError};
use crate::tasks::types::{Task, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::new(ErrorKind::BackendUnavailable, e.to_string())
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task, or replace an existing one if the status change is valid.
    async fn upsert(&self, task: Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Remove terminal tasks last updated before `cutoff_ms`. Returns how many were removed.
    async fn purge_before(&self, cutoff_ms: u64) -> Result<usize, StoreError>;

    /// Tasks still `queued` or `running`.
    async fn unfinished(&self) -> Result<Vec<Task>, StoreError>;
}

/// In-process task store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<DashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn upsert_sync(&self, task: Task) -> Result<(), StoreError> {
        match self.tasks.entry(task.id) {
            Entry::Vacant(slot) => {
                slot.insert(task);
            }
            Entry::Occupied(mut slot) => {
                let from = slot.get().status;
                if !from.can_transition_to(task.status) {
                    return Err(StoreError::InvalidTransition {
                        id: task.id,
                        from,
                        to: task.status,
                    });
                }
                slot.insert(task);
            }
        }
        Ok(())
    }

    fn purge_sync(&self, cutoff_ms: u64) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| !(task.status.is_terminal() && task.updated_at < cutoff_ms));
        before.saturating_sub(self.tasks.len())
    }

    fn snapshot(&self) -> Vec<Task> {
        self.tasks.iter().map(|r| r.value().clone()).collect()
    }

    fn unfinished_sync(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|r| !r.value().status.is_terminal())
            .map(|r| r.value().clone())
            .collect()
    }

    /// Put back the record a failed write replaced.
    fn restore(&self, id: TaskId, previous: Option<Task>) {
        match previous {
            Some(task) => {
                self.tasks.insert(id, task);
            }
            None => {
                self.tasks.remove(&id);
            }
        }
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn upsert(&self, task: Task) -> Result<(), StoreError> {
        self.upsert_sync(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(&id).map(|r| r.value().clone()))
    }

    async fn purge_before(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        Ok(self.purge_sync(cutoff_ms))
    }

    async fn unfinished(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.unfinished_sync())
    }
}

/// Task store that keeps a JSON snapshot on disk so tasks survive restarts.
///
/// Reads are served from memory. Each write rewrites the snapshot through a temp file and
/// a rename, serialized by a lock so a slower writer never overwrites a newer snapshot. A
/// write whose snapshot cannot be saved is undone in memory as well, so memory never holds
/// a record the file does not.
pub struct JsonFileTaskStore {
    inner: MemoryTaskStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileTaskStore {
    /// Open the store, loading an existing snapshot if there is one.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = MemoryTaskStore::new();

        if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read(&path).await?;
            if !raw.is_empty() {
                let tasks: Vec<Task> = serde_json::from_slice(&raw)?;
                for task in tasks {
                    inner.tasks.insert(task.id, task);
                }
            }
            tracing::info!(path = %path.display(), tasks = inner.len(), "Loaded task store snapshot");
        }

        Ok(Self {
            inner,
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Rewrite the snapshot. Callers hold `write_lock`.
    async fn persist(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn upsert(&self, task: Task) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let id = task.id;
        let previous = self.inner.tasks.get(&id).map(|r| r.value().clone());
        self.inner.upsert_sync(task)?;

        if let Err(e) = self.persist().await {
            self.inner.restore(id, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.get(id).await
    }

    async fn purge_before(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let purged = self.inner.purge_sync(cutoff_ms);
        if purged > 0 {
            self.persist().await?;
        }
        Ok(purged)
    }

    async fn unfinished(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.unfinished().await
    }
}
