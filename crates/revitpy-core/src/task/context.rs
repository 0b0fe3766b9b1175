//! Execution context handed to task work.

use crate::cancel::{CancellationToken, OperationCancelled};
use crate::domain::TaskId;
use crate::progress::ProgressReporter;

/// What a running attempt can see about its task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub(crate) task_id: TaskId,
    pub(crate) attempt: u32,
    pub(crate) token: Option<CancellationToken>,
    pub(crate) progress: Option<ProgressReporter>,
}

impl TaskContext {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    pub fn progress(&self) -> Option<&ProgressReporter> {
        self.progress.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Cooperative check point; no-op when the task has no token.
    pub fn check_cancelled(&self) -> Result<(), OperationCancelled> {
        match &self.token {
            Some(token) => token.throw_if_cancellation_requested(),
            None => Ok(()),
        }
    }
}
