//! The callable wrapped by a task.
//!
//! The dispatch mode is stated by the caller: async work is awaited on the
//! runtime, blocking work is handed to the blocking thread pool.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::context::TaskContext;
use crate::BoxFuture;
use crate::error::BoxError;

/// Outcome of one attempt.
pub type WorkResult = Result<Value, BoxError>;

type AsyncFn = dyn Fn(TaskContext) -> BoxFuture<'static, WorkResult> + Send + Sync;
type BlockingFn = dyn Fn(TaskContext) -> WorkResult + Send + Sync;

/// Re-invocable unit of work. Retries call it again with a fresh context.
#[derive(Clone)]
pub enum Work {
    Async(Arc<AsyncFn>),
    Blocking(Arc<BlockingFn>),
}

impl Work {
    pub fn from_async<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Work::Async(Arc::new(move |ctx| -> BoxFuture<'static, WorkResult> {
            let fut = f(ctx);
            Box::pin(async move { into_value(fut.await) })
        }))
    }

    pub fn from_blocking<F, T, E>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Into<BoxError>,
    {
        Work::Blocking(Arc::new(move |ctx| into_value(f(ctx))))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Work::Blocking(_))
    }
}

fn into_value<T: Serialize, E: Into<BoxError>>(result: Result<T, E>) -> WorkResult {
    let value = result.map_err(Into::into)?;
    Ok(serde_json::to_value(value)?)
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Work::Async(_) => f.write_str("Work::Async"),
            Work::Blocking(_) => f.write_str("Work::Blocking"),
        }
    }
}
