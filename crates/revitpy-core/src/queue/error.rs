use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task queue is not running")]
    NotRunning,

    #[error("task queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("timed out after {timeout:?} waiting for task {task_id}")]
    WaitTimeout { task_id: TaskId, timeout: Duration },
}
