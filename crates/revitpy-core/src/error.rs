//! Facade-level error type and shared error helpers.

use std::any::Any;

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{TaskError, TransactionId};
use crate::query::QueryError;
use crate::queue::QueueError;

/// Error type accepted from task work and port implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the orchestration facade.
#[derive(Debug, Error)]
pub enum RevitError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transaction '{name}' could not be started: {source}")]
    TransactionStart { name: String, source: BoxError },

    #[error("transaction {id} failed to commit: {source}")]
    TransactionCommit { id: TransactionId, source: BoxError },

    #[error("transaction '{name}' rolled back: {source}")]
    TransactionAborted { name: String, source: TaskError },

    #[error("transaction '{name}' timed out after {timeout:?}")]
    TransactionTimeout {
        name: String,
        timeout: std::time::Duration,
    },
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
