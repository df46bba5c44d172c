//! Async task subsystem.
//!
//! # Data Flow
//! ```text
//! submit (manager.rs):
//!     validate → persist `queued` (store.rs) → enqueue (queue.rs) → return task id
//!
//! worker (worker.rs):
//!     dequeue → claim `running` → ResilientExecutor → persist `done` | `error`
//!
//! status (manager.rs):
//!     point lookup → view, or `unknown` for ids never seen or already purged
//!
//! sweeper.rs:
//!     periodically purge finished tasks past retention
//!
//! startup recovery (manager.rs):
//!     requeue persisted `queued` tasks, fail `running` ones left by a stopped process
//! ```
//!
//! # Design Decisions
//! - Status only moves forward; the store rejects any other write
//! - Failures are recorded on the task with the same error kinds synchronous callers see
//! - With async disabled, submit runs inline and no task record is created

pub mod manager;
pub mod queue;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod worker;

pub use manager::{Recovered, Submission, TaskManager};
pub use queue::{task_queue, QueueError, TaskQueue, TaskReceiver};
pub use store::{JsonFileTaskStore, MemoryTaskStore, StoreError, TaskStore};
pub use sweeper::RetentionSweeper;
pub use types::{PollStatus, Task, TaskId, TaskMessage, TaskPayload, TaskStatus, TaskView};
pub use worker::{TaskContext, WorkerPool};
