//! Task: a schedulable, retryable, cancellable unit of work.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinError;
use tracing::{debug, error, warn};

use super::context::TaskContext;
use super::retry::RetryPolicy;
use super::work::{Work, WorkResult};
use crate::cancel::{CancellationToken, OperationCancelled};
use crate::domain::result::ResultHeader;
use crate::domain::{TaskError, TaskId, TaskPriority, TaskResult, TaskStatus};
use crate::error::{BoxError, panic_message};
use crate::progress::ProgressReporter;

/// Observer notified once the task has its terminal result.
pub type CompletionCallback = Arc<dyn Fn(&TaskResult) + Send + Sync>;

const RETRY_MESSAGE: &str = "Retrying after failure...";

/// Creation order shared by every task in the process; breaks priority ties.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A unit of deferred work plus its scheduling policy.
///
/// Built with the consuming `with_*` methods, then either handed to a
/// [`TaskQueue`](crate::queue::TaskQueue) or executed directly with
/// [`execute`](Self::execute). A task is executed at most once.
pub struct Task {
    id: TaskId,
    name: String,
    work: Work,
    priority: TaskPriority,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    cancellation_token: Option<CancellationToken>,
    progress: Option<ProgressReporter>,
    metadata: Map<String, Value>,
    callbacks: Vec<CompletionCallback>,

    status: TaskStatus,
    attempts: u32,
    outcome: Option<TaskResult>,

    sequence: u64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: impl Into<String>, work: Work) -> Self {
        Self {
            id: TaskId::generate(),
            name: name.into(),
            work,
            priority: TaskPriority::default(),
            timeout: None,
            retry: RetryPolicy::none(),
            cancellation_token: None,
            progress: None,
            metadata: Map::new(),
            callbacks: Vec::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            outcome: None,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Task around awaitable work.
    pub fn from_async<F, Fut, T, E>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self::new(name, Work::from_async(f))
    }

    /// Task around synchronous work, run on the blocking thread pool.
    pub fn from_blocking<F, T, E>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Into<BoxError>,
    {
        Self::new(name, Work::from_blocking(f))
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Bound each attempt (not the whole retry sequence).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry = RetryPolicy::new(retry_count, retry_delay);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Attach a reporter. The task owns its terminal transitions while it
    /// runs.
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskResult) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancellation_token.as_ref()
    }

    pub fn progress_reporter(&self) -> Option<&ProgressReporter> {
        self.progress.as_ref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.outcome.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run the task to a terminal status and return its result.
    ///
    /// Calling it again returns the same result without re-running.
    pub async fn execute(&mut self) -> TaskResult {
        if let Some(done) = &self.outcome {
            return done.clone();
        }

        let started = Instant::now();
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        debug!(task_id = %self.id, name = %self.name, "task started");

        let cancelled_early = self
            .cancellation_token
            .as_ref()
            .filter(|token| token.is_cancelled())
            .map(|token| OperationCancelled::new(token.reason()));
        if let Some(cancelled) = cancelled_early {
            return self.finish(started, Err(TaskError::Cancelled(cancelled)));
        }

        if let Some(progress) = &self.progress {
            progress.start(Some(&format!("Executing {}", self.name)));
        }

        let outcome = self.execute_with_retry().await;
        self.finish(started, outcome)
    }

    /// Cancel a task that never reached a worker.
    pub(crate) fn cancel_pending(&mut self, reason: Option<String>) -> TaskResult {
        self.finish(
            Instant::now(),
            Err(TaskError::Cancelled(OperationCancelled::new(reason))),
        )
    }

    async fn execute_with_retry(&mut self) -> Result<Value, TaskError> {
        let max_attempts = self.retry.max_attempts();
        loop {
            if let Some(token) = &self.cancellation_token {
                token.throw_if_cancellation_requested()?;
            }

            self.attempts += 1;
            let attempt = self.attempts;
            let err = match self.run_attempt(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancelled() || attempt >= max_attempts => return Err(err),
                Err(err) => err,
            };

            warn!(
                task_id = %self.id,
                name = %self.name,
                attempt,
                max_attempts,
                error = %err,
                "attempt failed, retrying"
            );
            if let Some(progress) = &self.progress {
                progress.report_progress(attempt as u64, max_attempts as u64, Some(RETRY_MESSAGE));
            }
            self.retry
                .backoff(attempt, self.cancellation_token.as_ref())
                .await;
        }
    }

    async fn run_attempt(&self, attempt: u32) -> Result<Value, TaskError> {
        let ctx = TaskContext {
            task_id: self.id,
            attempt,
            token: self.cancellation_token.clone(),
            progress: self.progress.clone(),
        };

        let mut handle = match &self.work {
            Work::Async(f) => tokio::spawn(f(ctx)),
            Work::Blocking(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(ctx))
            }
        };

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // blocking work cannot be interrupted; it is detached
                    handle.abort();
                    return Err(TaskError::Timeout(limit));
                }
            },
            None => handle.await,
        };
        flatten(joined)
    }

    fn finish(&mut self, started: Instant, outcome: Result<Value, TaskError>) -> TaskResult {
        let header = ResultHeader {
            task_id: self.id,
            name: self.name.clone(),
            execution_time: started.elapsed(),
            attempts: self.attempts,
            metadata: self.metadata.clone(),
        };

        let result = match outcome {
            Ok(value) => {
                self.status = TaskStatus::Completed;
                if let Some(progress) = &self.progress {
                    progress.complete(Some(&format!("Completed {}", self.name)));
                }
                debug!(task_id = %self.id, name = %self.name, attempts = self.attempts, "task completed");
                TaskResult::completed(header, value)
            }
            Err(TaskError::Cancelled(cancelled)) => {
                self.status = TaskStatus::Cancelled;
                if let Some(progress) = &self.progress {
                    progress.cancel(Some(&format!("Cancelled {}", self.name)));
                }
                debug!(task_id = %self.id, name = %self.name, reason = ?cancelled.reason(), "task cancelled");
                TaskResult::cancelled(header, cancelled)
            }
            Err(err) => {
                self.status = TaskStatus::Failed;
                if let Some(progress) = &self.progress {
                    let detail = err.to_string();
                    progress.fail(Some(&format!("Failed {}", self.name)), Some(&detail));
                }
                error!(
                    task_id = %self.id,
                    name = %self.name,
                    attempts = self.attempts,
                    error = %err,
                    "task failed"
                );
                TaskResult::failed(header, err)
            }
        };

        self.completed_at = Some(result.completed_at());
        self.outcome = Some(result.clone());

        for callback in &self.callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&result))) {
                error!(
                    task_id = %self.id,
                    panic = %panic_message(panic.as_ref()),
                    "completion callback panicked"
                );
            }
        }
        result
    }
}

fn flatten(joined: Result<WorkResult, JoinError>) -> Result<Value, TaskError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::from_boxed(err)),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            Err(TaskError::Panicked(panic_message(payload.as_ref())))
        }
        Err(_) => Err(TaskError::Cancelled(OperationCancelled::new(Some(
            "attempt aborted".to_owned(),
        )))),
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("attempts", &self.attempts)
            .finish()
    }
}
