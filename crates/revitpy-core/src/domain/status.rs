//! TaskStatus - タスクの状態遷移
//!
//! pending -> running -> {completed, failed, cancelled}（3つとも終端）
//! 実行前に取り消されたタスクは pending -> cancelled

use serde::{Deserialize, Serialize};

/// Lifecycle of a task.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed (retries exhausted)
/// - Pending -> Running -> Cancelled (token observed)
/// - Pending -> Cancelled (removed from the queue before dispatch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,

    /// Currently being executed by a worker.
    Running,

    /// Finished successfully.
    Completed,

    /// Finished with an error after all attempts.
    Failed,

    /// Stopped through its cancellation token.
    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}
