//! revitpy-core
//!
//! Concurrency core for host-application scripting: a priority task queue
//! with retry, timeout, cooperative cancellation and progress reporting, plus
//! a deferred query builder over element collections.
//!
//! # Modules
//! - **cancel**: `CancellationTokenSource` / `CancellationToken`
//! - **progress**: throttled progress reporters, scopes and aggregation
//! - **task**: `Task`, its retry policy and free-standing combinators
//! - **queue**: `TaskQueue`, a bounded priority queue with a worker pool
//! - **query**: `QueryBuilder` / `ElementSet`
//! - **app**: `AsyncRevit`, the orchestration facade
//! - **ports** / **impls**: host-facing interfaces and in-memory versions
//! - **config**, **domain**, **error**: shared types

pub mod app;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod progress;
pub mod query;
pub mod queue;
pub mod task;

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used for type-erased async callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use app::{AsyncRevit, BatchOptions, TransactionOptions};
pub use cancel::{CancellationToken, CancellationTokenSource, OperationCancelled, combine_tokens};
pub use config::{ConfigError, RuntimeConfig};
pub use domain::{TaskError, TaskId, TaskPriority, TaskResult, TaskStatus, TransactionId};
pub use error::{BoxError, RevitError};
pub use progress::{AsyncProgressReporter, ProgressReport, ProgressReporter, ProgressState};
pub use query::{ElementSet, FilterOperator, QueryBuilder, QueryError};
pub use queue::{QueueError, QueueStats, TaskQueue};
pub use task::{RetryPolicy, Task, TaskContext, Work};
