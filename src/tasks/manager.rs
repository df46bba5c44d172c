//! Task manager: the submit and poll side of async tasks.

use tokio::time::Instant;

use crate::downstream::{ErrorKind, GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::tasks::queue::TaskQueue;
use crate::tasks::types::{PollStatus, Task, TaskId, TaskMessage, TaskPayload, TaskStatus, TaskView};
use crate::tasks::worker::TaskContext;

/// What `submit` did with the work.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Persisted and queued; poll with the id.
    Queued { task_id: TaskId },
    /// Executed inline because async tasks are disabled. No task record exists.
    Completed(TaskView),
}

/// Outcome of [`TaskManager::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovered {
    pub requeued: usize,
    pub failed: usize,
}

pub struct TaskManager {
    context: TaskContext,
    queue: TaskQueue,
    async_enabled: bool,
}

impl TaskManager {
    pub fn new(context: TaskContext, queue: TaskQueue, async_enabled: bool) -> Self {
        Self {
            context,
            queue,
            async_enabled,
        }
    }

    pub fn async_enabled(&self) -> bool {
        self.async_enabled
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Submit a long-running operation.
    ///
    /// The operation and its parameters are validated up front, so a malformed request is
    /// rejected here instead of surfacing later as a failed task. `deadline` only bounds the
    /// inline path; queued work runs under the executor's per-attempt timeout.
    pub async fn submit(
        &self,
        payload: TaskPayload,
        credential: Option<String>,
        deadline: Option<Instant>,
    ) -> GatewayResult<Submission> {
        let request = self.context.operations.build_request(
            &payload.operation,
            &payload.params,
            payload.body.clone(),
            credential.clone(),
        )?;

        if !self.async_enabled {
            let view = match self.context.executor.execute(&request, deadline).await {
                Ok(result) => TaskView {
                    task_id: None,
                    status: PollStatus::Done,
                    result: Some(result),
                    error: None,
                },
                Err(error) => TaskView {
                    task_id: None,
                    status: PollStatus::Error,
                    result: None,
                    error: Some(error),
                },
            };
            tracing::info!(operation = %payload.operation, status = ?view.status, "Task executed inline");
            return Ok(Submission::Completed(view));
        }

        let task = Task::queued(payload.clone());
        let task_id = task.id;
        self.context.store.upsert(task.clone()).await?;
        tracing::info!(%task_id, operation = %payload.operation, "task_created");
        metrics::record_task(TaskStatus::Queued.as_str());

        let message = TaskMessage {
            task_id,
            payload,
            credential,
        };
        if let Err(e) = self.queue.enqueue(message) {
            tracing::error!(%task_id, error = %e, "Failed to enqueue task");
            self.close_out(&task, GatewayError::from(e.clone())).await;
            return Err(e.into());
        }

        Ok(Submission::Queued { task_id })
    }

    /// Settle tasks a previous process left unfinished. Run once at startup, before workers
    /// start and before the listener accepts submissions.
    ///
    /// `queued` tasks go back on the queue when async execution is enabled. They run with
    /// the configured service key, since caller credentials are never persisted. Tasks that
    /// were `running` had their worker stop under them and are marked `error`, as are
    /// `queued` tasks that cannot be queued.
    pub async fn recover(&self) -> GatewayResult<Recovered> {
        let mut recovered = Recovered::default();

        for task in self.context.store.unfinished().await? {
            let task_id = task.id;
            let error = match task.status {
                TaskStatus::Queued if self.async_enabled => {
                    let message = TaskMessage {
                        task_id,
                        payload: task.payload.clone(),
                        credential: None,
                    };
                    match self.queue.enqueue(message) {
                        Ok(()) => {
                            tracing::info!(%task_id, operation = %task.payload.operation, "task_requeued");
                            recovered.requeued += 1;
                            continue;
                        }
                        Err(e) => GatewayError::from(e),
                    }
                }
                TaskStatus::Queued => GatewayError::new(
                    ErrorKind::BackendUnavailable,
                    "async task execution is disabled",
                ),
                _ => GatewayError::new(
                    ErrorKind::UnknownDownstreamError,
                    "task interrupted by gateway restart",
                ),
            };

            tracing::warn!(%task_id, status = %task.status, kind = %error.kind, "task_error");
            metrics::record_task(TaskStatus::Error.as_str());
            self.close_out(&task, error).await;
            recovered.failed += 1;
        }

        if recovered != Recovered::default() {
            tracing::info!(
                requeued = recovered.requeued,
                failed = recovered.failed,
                "Recovered unfinished tasks"
            );
        }
        Ok(recovered)
    }

    /// Move a `queued` or `running` task to `error`.
    async fn close_out(&self, task: &Task, error: GatewayError) {
        let running = match task.status {
            TaskStatus::Queued => task.with_status(TaskStatus::Running),
            _ => task.clone(),
        };
        let failed = running.failed(error);

        let writes = if task.status == TaskStatus::Queued {
            vec![running, failed]
        } else {
            vec![failed]
        };
        for record in writes {
            if let Err(e) = self.context.store.upsert(record).await {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to close out task");
                return;
            }
        }
    }

    /// Current status of a task. Unrecognized or malformed ids report `unknown`.
    pub async fn status(&self, task_id: &str) -> GatewayResult<TaskView> {
        let Ok(id) = task_id.parse::<TaskId>() else {
            tracing::info!(task_id, "task_status_unknown");
            return Ok(TaskView::unknown(task_id));
        };

        match self.context.store.get(id).await? {
            Some(task) => {
                tracing::debug!(%id, status = %task.status, "task_status");
                Ok(task.into())
            }
            None => {
                tracing::info!(%id, "task_status_unknown");
                Ok(TaskView::unknown(task_id))
            }
        }
    }
}
