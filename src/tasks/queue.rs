//! In-process task queue.
//!
//! A bounded channel between submitters and the worker pool. Workers share the single
//! receiver, so each message is delivered to exactly one of them.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::downstream::{ErrorKind, GatewayError};
use crate::tasks::types::TaskMessage;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue is full")]
    Full,
    #[error("task queue is closed")]
    Closed,
}

impl From<QueueError> for GatewayError {
    fn from(e: QueueError) -> Self {
        GatewayError::new(ErrorKind::BackendUnavailable, e.to_string())
    }
}

/// Sending half, held by the task manager.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<TaskMessage>,
}

/// Receiving half, shared by all workers.
pub type TaskReceiver = Arc<Mutex<mpsc::Receiver<TaskMessage>>>;

pub fn task_queue(capacity: usize) -> (TaskQueue, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TaskQueue { tx }, Arc::new(Mutex::new(rx)))
}

impl TaskQueue {
    /// Enqueue without waiting; a full queue is reported rather than awaited.
    pub fn enqueue(&self, message: TaskMessage) -> Result<(), QueueError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
