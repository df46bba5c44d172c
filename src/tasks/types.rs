//! Task model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::downstream::GatewayError;

/// Opaque task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// `queued → running → done | error`; nothing else.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation a task performs once a worker picks it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub operation: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayError>,
    /// Unix milliseconds of the last status change.
    pub updated_at: u64,
}

impl Task {
    pub fn queued(payload: TaskPayload) -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Queued,
            payload,
            result: None,
            error: None,
            updated_at: now_millis(),
        }
    }

    /// Copy of this task moved to `status`.
    pub fn with_status(&self, status: TaskStatus) -> Self {
        Self {
            status,
            updated_at: now_millis(),
            ..self.clone()
        }
    }

    pub fn completed(&self, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            ..self.with_status(TaskStatus::Done)
        }
    }

    pub fn failed(&self, error: GatewayError) -> Self {
        Self {
            result: None,
            error: Some(error),
            ..self.with_status(TaskStatus::Error)
        }
    }
}

/// Message carried on the queue from submitter to worker.
///
/// The caller's credential travels with the message but is never persisted.
#[derive(Debug, Clone)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub payload: TaskPayload,
    pub credential: Option<String>,
}

/// Status as seen by a poller; `Unknown` covers ids that were never stored or were purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Queued,
    Running,
    Done,
    Error,
    Unknown,
}

impl From<TaskStatus> for PollStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Queued => PollStatus::Queued,
            TaskStatus::Running => PollStatus::Running,
            TaskStatus::Done => PollStatus::Done,
            TaskStatus::Error => PollStatus::Error,
        }
    }
}

/// Read-only answer to a status poll, or the inline result in synchronous mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: PollStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayError>,
}

impl TaskView {
    pub fn unknown(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            status: PollStatus::Unknown,
            result: None,
            error: None,
        }
    }
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            task_id: Some(task.id.to_string()),
            status: task.status.into(),
            result: task.result,
            error: task.error,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
