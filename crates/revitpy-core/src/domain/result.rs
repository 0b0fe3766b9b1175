//! Terminal task outcome: `TaskResult` and `TaskError`.
//!
//! A `TaskResult` is built exactly once, when a task reaches a terminal
//! status, and is never mutated afterwards. The queue hands out clones.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::ids::TaskId;
use super::status::TaskStatus;
use crate::cancel::OperationCancelled;
use crate::error::BoxError;

/// Original error raised by task work, shared so results stay clonable.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Why a task did not complete.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    Cancelled(#[from] OperationCancelled),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Failed(SharedError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wrap an arbitrary error as a task failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::from_boxed(err.into())
    }

    /// Classify an error returned by task work.
    ///
    /// `OperationCancelled` and `TaskError` values keep their meaning; any
    /// other error becomes `Failed` with the original error preserved.
    pub fn from_boxed(err: BoxError) -> Self {
        let err = match err.downcast::<OperationCancelled>() {
            Ok(cancelled) => return TaskError::Cancelled(*cancelled),
            Err(other) => other,
        };
        match err.downcast::<TaskError>() {
            Ok(task_err) => *task_err,
            Err(other) => TaskError::Failed(Arc::from(other)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }

    /// Recover the concrete error type raised by the work, if it was `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            TaskError::Failed(err) => err.as_ref().downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Immutable snapshot of a finished task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    task_id: TaskId,
    name: String,
    status: TaskStatus,
    result: Option<Value>,
    error: Option<TaskError>,
    execution_time: Duration,
    attempts: u32,
    metadata: Map<String, Value>,
    completed_at: DateTime<Utc>,
}

/// Fields shared by every terminal result.
#[derive(Debug, Clone)]
pub(crate) struct ResultHeader {
    pub task_id: TaskId,
    pub name: String,
    pub execution_time: Duration,
    pub attempts: u32,
    pub metadata: Map<String, Value>,
}

impl TaskResult {
    pub(crate) fn completed(header: ResultHeader, value: Value) -> Self {
        Self::build(header, TaskStatus::Completed, Some(value), None)
    }

    pub(crate) fn failed(header: ResultHeader, error: TaskError) -> Self {
        Self::build(header, TaskStatus::Failed, None, Some(error))
    }

    pub(crate) fn cancelled(header: ResultHeader, cancelled: OperationCancelled) -> Self {
        Self::build(
            header,
            TaskStatus::Cancelled,
            None,
            Some(TaskError::Cancelled(cancelled)),
        )
    }

    fn build(
        header: ResultHeader,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<TaskError>,
    ) -> Self {
        Self {
            task_id: header.task_id,
            name: header.name,
            status,
            result,
            error,
            execution_time: header.execution_time,
            attempts: header.attempts,
            metadata: header.metadata,
            completed_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Number of attempts made before the task reached its terminal status.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Return the value of a completed task, or its terminal error.
    pub fn get_result_or_raise(&self) -> Result<Value, TaskError> {
        match (&self.status, &self.error) {
            (TaskStatus::Completed, _) => Ok(self.result.clone().unwrap_or(Value::Null)),
            (TaskStatus::Cancelled, Some(TaskError::Cancelled(c))) => {
                Err(TaskError::Cancelled(c.clone()))
            }
            (TaskStatus::Cancelled, _) => Err(TaskError::Cancelled(OperationCancelled::new(None))),
            (_, Some(err)) => Err(err.clone()),
            (_, None) => Err(TaskError::Failed(Arc::new(std::io::Error::other(
                "task finished without a result",
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("wall {0} is locked")]
    struct LockedWall(u32);

    fn header() -> ResultHeader {
        ResultHeader {
            task_id: TaskId::generate(),
            name: "t".into(),
            execution_time: Duration::from_millis(5),
            attempts: 1,
            metadata: Map::new(),
        }
    }

    #[test]
    fn completed_result_returns_value() {
        let r = TaskResult::completed(header(), serde_json::json!(42));
        assert!(r.is_success());
        assert_eq!(r.get_result_or_raise().unwrap(), serde_json::json!(42));
        assert!(r.error().is_none());
    }

    #[test]
    fn failed_result_preserves_original_error_type() {
        let r = TaskResult::failed(header(), TaskError::failed(LockedWall(7)));
        let err = r.get_result_or_raise().unwrap_err();
        assert_eq!(err.to_string(), "wall 7 is locked");
        assert_eq!(err.downcast_ref::<LockedWall>().map(|w| w.0), Some(7));
    }

    #[test]
    fn cancelled_result_raises_operation_cancelled() {
        let r = TaskResult::cancelled(header(), OperationCancelled::new(Some("stop".into())));
        assert_eq!(r.status(), TaskStatus::Cancelled);
        let err = r.get_result_or_raise().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn boxed_errors_are_classified() {
        let cancelled: BoxError = Box::new(OperationCancelled::new(None));
        assert!(TaskError::from_boxed(cancelled).is_cancelled());

        let timeout: BoxError = Box::new(TaskError::Timeout(Duration::from_secs(1)));
        assert!(TaskError::from_boxed(timeout).is_timeout());

        let other: BoxError = "plain".into();
        assert!(matches!(TaskError::from_boxed(other), TaskError::Failed(_)));
    }
}
