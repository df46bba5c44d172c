//! Retention for finished tasks.
//!
//! Tasks have no cancellation path. Finished (`done` or `error`) tasks are kept for
//! `retention_secs` after their last update and then purged; polling a purged id reports
//! `unknown`. Queued and running tasks are never purged.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::TaskConfig;
use crate::tasks::store::{StoreError, TaskStore};
use crate::tasks::types::now_millis;

pub struct RetentionSweeper {
    store: Arc<dyn TaskStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn TaskStore>, config: &TaskConfig) -> Self {
        Self {
            store,
            retention: Duration::from_secs(config.retention_secs),
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Task retention sweeper starting"
        );

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(now_millis()).await {
                        tracing::error!(error = %e, "Task retention sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Task retention sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn sweep_once(&self, now_ms: u64) -> Result<usize, StoreError> {
        let cutoff = now_ms.saturating_sub(self.retention.as_millis() as u64);
        let purged = self.store.purge_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired tasks");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::store::MemoryTaskStore;
    use crate::tasks::types::{Task, TaskPayload, TaskStatus};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_sweep_respects_retention() {
        let store = MemoryTaskStore::new();
        let config = TaskConfig {
            retention_secs: 60,
            ..TaskConfig::default()
        };
        let sweeper = RetentionSweeper::new(Arc::new(store.clone()), &config);

        let task = Task::queued(TaskPayload {
            operation: "get_devices".to_string(),
            params: HashMap::new(),
            body: None,
        })
        .with_status(TaskStatus::Running)
        .completed(serde_json::json!([]));
        let finished_at = task.updated_at;
        store.upsert(task.clone()).await.unwrap();

        assert_eq!(sweeper.sweep_once(finished_at + 59_000).await.unwrap(), 0);
        assert_eq!(sweeper.sweep_once(finished_at + 61_000).await.unwrap(), 1);
        assert!(store.get(task.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = MemoryTaskStore::new();
        let sweeper = RetentionSweeper::new(Arc::new(store), &TaskConfig::default());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(sweeper.run(rx));
        time::advance(Duration::from_secs(600)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
