//! Task workers.
//!
//! Each worker pulls a message, claims the task (`queued → running`), runs it through the
//! shared executor and records `done` or `error`. A claim that fails because the task has
//! already left `queued` means the message was redelivered; it is dropped.
//!
//! Store writes that fail for any other reason are retried a few times. A task whose claim
//! never lands stays `queued`, and one whose outcome never lands stays `running`; startup
//! recovery settles both.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::downstream::{ErrorKind, GatewayError, OperationTable};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::ResilientExecutor;
use crate::tasks::queue::TaskReceiver;
use crate::tasks::store::{StoreError, TaskStore};
use crate::tasks::types::{Task, TaskMessage, TaskStatus};

/// Dependencies shared by the worker pool and the synchronous submit path.
#[derive(Clone)]
pub struct TaskContext {
    pub store: Arc<dyn TaskStore>,
    pub executor: Arc<ResilientExecutor>,
    pub operations: Arc<OperationTable>,
}

const STORE_ATTEMPTS: u32 = 3;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct WorkerPool;

impl WorkerPool {
    /// Start `workers` loops on the shared receiver. They exit on shutdown or when the
    /// queue closes.
    pub fn spawn(
        workers: usize,
        context: TaskContext,
        receiver: TaskReceiver,
        shutdown: &Shutdown,
    ) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|worker_id| {
                let context = context.clone();
                let receiver = receiver.clone();
                let shutdown = shutdown.subscribe();
                tokio::spawn(run_worker(worker_id, context, receiver, shutdown))
            })
            .collect()
    }
}

async fn run_worker(
    worker_id: usize,
    context: TaskContext,
    receiver: TaskReceiver,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(worker_id, "Task worker starting");
    loop {
        let message = tokio::select! {
            message = async { receiver.lock().await.recv().await } => message,
            _ = shutdown.recv() => {
                tracing::debug!(worker_id, "Task worker received shutdown signal");
                break;
            }
        };

        match message {
            Some(message) => process_message(&context, message).await,
            None => break,
        }
    }
    tracing::debug!(worker_id, "Task worker stopped");
}

/// Run one queued task to a terminal status.
pub async fn process_message(context: &TaskContext, message: TaskMessage) {
    let task_id = message.task_id;

    let task = match context.store.get(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::warn!(%task_id, "Dropping message for unknown task");
            return;
        }
        Err(e) => {
            tracing::error!(%task_id, error = %e, "Failed to load task");
            return;
        }
    };

    let running = task.with_status(TaskStatus::Running);
    match upsert_with_retry(context.store.as_ref(), &running).await {
        Ok(()) => {}
        Err(StoreError::InvalidTransition { from, .. }) => {
            tracing::info!(%task_id, status = %from, "Skipping redelivered task");
            return;
        }
        Err(e) => {
            tracing::error!(%task_id, error = %e, "Failed to claim task");
            return;
        }
    }
    tracing::info!(%task_id, operation = %message.payload.operation, "task_running");
    metrics::record_task(TaskStatus::Running.as_str());

    let finished = match execute(context, &message).await {
        Ok(result) => {
            tracing::info!(%task_id, "task_complete");
            running.completed(result)
        }
        Err(error) => {
            tracing::warn!(%task_id, kind = %error.kind, message = %error.message, "task_error");
            running.failed(error)
        }
    };
    metrics::record_task(finished.status.as_str());

    if let Err(e) = upsert_with_retry(context.store.as_ref(), &finished).await {
        tracing::error!(%task_id, error = %e, "Failed to record task outcome");
    }
}

/// Upsert, retrying failures other than a rejected transition.
async fn upsert_with_retry(store: &dyn TaskStore, task: &Task) -> Result<(), StoreError> {
    let mut attempt = 1;
    loop {
        match store.upsert(task.clone()).await {
            Err(e @ StoreError::InvalidTransition { .. }) => return Err(e),
            Err(e) if attempt < STORE_ATTEMPTS => {
                tracing::warn!(task_id = %task.id, attempt, error = %e, "Task store write failed, retrying");
                attempt += 1;
                tokio::time::sleep(STORE_RETRY_DELAY).await;
            }
            outcome => return outcome,
        }
    }
}

/// Execute on a separate task so a panic inside the call becomes an `error` status
/// instead of taking the worker down.
async fn execute(context: &TaskContext, message: &TaskMessage) -> Result<serde_json::Value, GatewayError> {
    let request = context.operations.build_request(
        &message.payload.operation,
        &message.payload.params,
        message.payload.body.clone(),
        message.credential.clone(),
    )?;

    let executor = context.executor.clone();
    let handle = tokio::spawn(async move { executor.execute(&request, None).await });
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(GatewayError::new(
            ErrorKind::UnknownDownstreamError,
            format!("task execution aborted: {}", e),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::Failure;
    use crate::tasks::queue::task_queue;
    use crate::tasks::store::MemoryTaskStore;
    use crate::tasks::test_support::{context_with, StubTransport};
    use crate::tasks::types::{Task, TaskPayload};
    use std::collections::HashMap;
    use std::time::Duration;

    fn payload(operation: &str, device: &str) -> TaskPayload {
        TaskPayload {
            operation: operation.to_string(),
            params: HashMap::from([("device_id".to_string(), device.to_string())]),
            body: None,
        }
    }

    async fn enqueue_stored(store: &MemoryTaskStore, payload: TaskPayload) -> TaskMessage {
        let task = Task::queued(payload.clone());
        store.upsert(task.clone()).await.unwrap();
        TaskMessage {
            task_id: task.id,
            payload,
            credential: None,
        }
    }

    #[tokio::test]
    async fn test_process_success() {
        let transport = StubTransport::new().respond("/devices/d-1", Ok(serde_json::json!({"id": "d-1"})));
        let store = MemoryTaskStore::new();
        let context = context_with(transport, store.clone());

        let message = enqueue_stored(&store, payload("get_device", "d-1")).await;
        process_message(&context, message.clone()).await;

        let task = store.get(message.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.result, Some(serde_json::json!({"id": "d-1"})));
    }

    #[tokio::test]
    async fn test_process_classified_failure() {
        let transport = StubTransport::new().respond(
            "/devices/d-9",
            Err(Failure::Status {
                status: 404,
                body: "missing".to_string(),
            }),
        );
        let store = MemoryTaskStore::new();
        let context = context_with(transport, store.clone());

        let message = enqueue_stored(&store, payload("get_device", "d-9")).await;
        process_message(&context, message.clone()).await;

        let task = store.get(message.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.unwrap().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_panicking_call_becomes_error() {
        let transport = StubTransport::new().panic_on("/devices/boom");
        let store = MemoryTaskStore::new();
        let context = context_with(transport, store.clone());

        let message = enqueue_stored(&store, payload("get_device", "boom")).await;
        process_message(&context, message.clone()).await;

        let task = store.get(message.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.unwrap().kind, ErrorKind::UnknownDownstreamError);
    }

    #[tokio::test]
    async fn test_redelivery_is_skipped() {
        let transport = StubTransport::new().respond("/devices/d-1", Ok(serde_json::json!(1)));
        let store = MemoryTaskStore::new();
        let context = context_with(transport.clone(), store.clone());

        let message = enqueue_stored(&store, payload("get_device", "d-1")).await;
        process_message(&context, message.clone()).await;
        process_message(&context, message.clone()).await;

        assert_eq!(transport.calls(), 1);
        let task = store.get(message.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }

    /// Store whose next `failures` writes fail with an I/O error.
    struct FlakyStore {
        inner: MemoryTaskStore,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TaskStore for FlakyStore {
        async fn upsert(&self, task: Task) -> Result<(), StoreError> {
            use std::sync::atomic::Ordering;
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
            }
            self.inner.upsert(task).await
        }

        async fn get(&self, id: crate::tasks::TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.get(id).await
        }

        async fn purge_before(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
            self.inner.purge_before(cutoff_ms).await
        }

        async fn unfinished(&self) -> Result<Vec<Task>, StoreError> {
            self.inner.unfinished().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_store_failures_are_retried() {
        let transport = StubTransport::new().respond("/devices/d-1", Ok(serde_json::json!("ok")));
        let store = MemoryTaskStore::new();
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            failures: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut context = context_with(transport, store.clone());
        context.store = flaky.clone();

        let message = enqueue_stored(&store, payload("get_device", "d-1")).await;
        flaky.failures.store(2, std::sync::atomic::Ordering::SeqCst);
        process_message(&context, message.clone()).await;

        let task = store.get(message.task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimable_task_stays_queued() {
        let transport = StubTransport::new().respond("/devices/d-1", Ok(serde_json::json!("ok")));
        let store = MemoryTaskStore::new();
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            failures: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut context = context_with(transport.clone(), store.clone());
        context.store = flaky.clone();

        let message = enqueue_stored(&store, payload("get_device", "d-1")).await;
        flaky.failures.store(STORE_ATTEMPTS as usize, std::sync::atomic::Ordering::SeqCst);
        process_message(&context, message.clone()).await;

        // The claim never landed, so nothing ran and the task is still queued.
        assert_eq!(transport.calls(), 0);
        let unfinished = store.unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let transport = StubTransport::new()
            .respond("/devices/a", Ok(serde_json::json!("a")))
            .respond("/devices/b", Ok(serde_json::json!("b")));
        let store = MemoryTaskStore::new();
        let context = context_with(transport, store.clone());
        let shutdown = Shutdown::new();
        let (queue, receiver) = task_queue(8);

        let handles = WorkerPool::spawn(2, context, receiver, &shutdown);

        let first = enqueue_stored(&store, payload("get_device", "a")).await;
        let second = enqueue_stored(&store, payload("get_device", "b")).await;
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second.clone()).unwrap();

        for _ in 0..100 {
            let a = store.get(first.task_id).await.unwrap().unwrap();
            let b = store.get(second.task_id).await.unwrap().unwrap();
            if a.status.is_terminal() && b.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get(first.task_id).await.unwrap().unwrap().status, TaskStatus::Done);
        assert_eq!(store.get(second.task_id).await.unwrap().unwrap().status, TaskStatus::Done);

        shutdown.trigger();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
