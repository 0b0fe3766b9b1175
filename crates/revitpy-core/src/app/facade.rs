//! AsyncRevit - queue 1つ、element provider 1つ、document 1つを束ねる facade
//!
//! # 設計原則
//! - facade が自分の `TaskQueue` を所有する（プロセス全体の既定 queue は無い）
//! - batch update は要素ごとに1タスクを投入し、結果は入力順に返す
//! - 開始されなかった要素にも必ず `Cancelled` の結果を返す（1要素1結果）
//! - transaction はスコープ付き：begin → 実行 → commit か rollback のどちらか1回

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::batch::BatchOptions;
use super::transaction::TransactionOptions;
use crate::config::RuntimeConfig;
use crate::domain::{TaskError, TaskId, TaskResult, TaskStatus, TransactionId};
use crate::error::{BoxError, RevitError};
use crate::ports::{DocumentSession, ElementProperty, ElementProvider};
use crate::progress::ProgressReporter;
use crate::query::QueryBuilder;
use crate::queue::{QueueError, TaskQueue};
use crate::task::{Task, TaskContext, Work};

const SKIPPED_REASON: &str = "Batch aborted before this element was scheduled";

pub struct AsyncRevit<E> {
    config: RuntimeConfig,
    queue: Arc<TaskQueue>,
    provider: Arc<dyn ElementProvider<E>>,
    document: Arc<dyn DocumentSession>,
}

impl<E> AsyncRevit<E>
where
    E: ElementProperty + Clone + Send + Sync + 'static,
{
    pub fn new(
        config: RuntimeConfig,
        provider: Arc<dyn ElementProvider<E>>,
        document: Arc<dyn DocumentSession>,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new(config.queue.clone()));
        Self {
            config,
            queue,
            provider,
            document,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub async fn start(&self) {
        self.queue.start().await;
    }

    pub async fn stop(&self, timeout: Option<Duration>) {
        self.queue.stop(timeout).await;
    }

    pub fn query(&self) -> QueryBuilder<E> {
        QueryBuilder::new(Arc::clone(&self.provider))
    }

    pub fn query_of_type(&self, element_type: impl Into<String>) -> QueryBuilder<E> {
        self.query().of_type(element_type)
    }

    /// Reporter using the configured throttle interval.
    pub fn progress_reporter(&self, total: u64) -> ProgressReporter {
        ProgressReporter::with_throttle(total, self.config.progress.throttle_interval)
    }

    /// Task with the configured default timeout and retry policy.
    pub fn task(&self, name: impl Into<String>, work: Work) -> Task {
        let mut task = Task::new(name, work).with_retry_policy(self.config.task.retry);
        if let Some(timeout) = self.config.task.default_timeout() {
            task = task.with_timeout(timeout);
        }
        task
    }

    pub async fn enqueue(&self, task: Task) -> Result<TaskId, RevitError> {
        Ok(self.queue.enqueue(task).await?)
    }

    /// Enqueue async work with the configured defaults.
    pub async fn run_background<F, Fut, T, Er>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<TaskId, RevitError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Er>> + Send + 'static,
        T: Serialize + Send + 'static,
        Er: Into<BoxError> + Send + 'static,
    {
        let task = self.task(name, Work::from_async(f));
        let name = task.name().to_owned();
        let task_id = self.enqueue(task).await?;
        debug!(%task_id, %name, "background task submitted");
        Ok(task_id)
    }

    pub async fn wait_for(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Result<TaskResult, RevitError> {
        Ok(self.queue.wait_for_task(task_id, timeout).await?)
    }

    /// Apply `updater` to every element, `batch_size` elements at a time.
    ///
    /// Returns one result per element, in input order. Elements never
    /// started get a `Cancelled` result with zero attempts: after
    /// cancellation, after `fail_fast` stops on a failing batch, when the
    /// queue refuses an element (full, stopped), or when the queue is stopped
    /// while the element is still pending. Fails with `NotRunning` only if
    /// the queue is stopped before the first element.
    pub async fn batch_update<F, Fut, T, Er>(
        &self,
        elements: Vec<E>,
        updater: F,
        options: BatchOptions,
    ) -> Result<Vec<TaskResult>, RevitError>
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Er>> + Send + 'static,
        T: Serialize + Send + 'static,
        Er: Into<BoxError> + Send + 'static,
    {
        if !self.queue.is_running() {
            return Err(QueueError::NotRunning.into());
        }
        let total = elements.len();
        let updater = Arc::new(updater);
        let batch_count = total.div_ceil(options.batch_size);
        let progress = options.progress.as_ref();
        if let Some(progress) = progress {
            progress.set_total(total as u64);
            progress.start(Some(&format!("Processing {total} elements")));
        }
        info!(name = %options.name, total, batch_size = options.batch_size, "batch update started");

        let mut results = Vec::with_capacity(total);
        let mut aborted: Option<String> = None;
        let mut pending = elements.into_iter().enumerate();

        for batch_index in 0..batch_count {
            if let Some(token) = &options.cancellation_token
                && token.is_cancelled()
            {
                aborted = Some(token.reason().unwrap_or_else(|| SKIPPED_REASON.to_owned()));
                if let Some(progress) = progress {
                    progress.cancel(Some("Batch update cancelled"));
                }
                break;
            }
            if batch_index > 0 && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }

            let mut ids = Vec::with_capacity(options.batch_size);
            let mut refused = None;
            for (index, element) in pending.by_ref().take(options.batch_size) {
                let updater = Arc::clone(&updater);
                let work = Work::from_async(move |_ctx| updater(element.clone()));
                let mut task = self
                    .task(format!("{}[{index}]", options.name), work)
                    .with_priority(options.priority)
                    .with_metadata("batch", batch_index)
                    .with_metadata("index", index);
                if let Some(token) = &options.cancellation_token {
                    task = task.with_cancellation_token(token.clone());
                }
                match self.queue.enqueue(task).await {
                    Ok(id) => ids.push(id),
                    Err(err) => {
                        warn!(name = %options.name, index, error = %err, "batch element refused by queue");
                        refused = Some((index, err));
                        break;
                    }
                }
            }

            let batch_len = ids.len() as u64;
            let mut batch_failed = false;
            for id in ids {
                let result = self.wait_for_member(id).await?;
                batch_failed |= result.status() == TaskStatus::Failed;
                results.push(result);
            }
            debug!(name = %options.name, batch = batch_index + 1, of = batch_count, "batch finished");

            if let Some((index, err)) = refused {
                let reason = format!("Batch {} of {batch_count} not scheduled: {err}", batch_index + 1);
                if let Some(progress) = progress {
                    progress.fail(Some(&reason), Some(&err.to_string()));
                }
                results.push(skipped(&options.name, index, &reason));
                aborted = Some(reason);
                break;
            }

            if batch_failed && options.fail_fast {
                let message = format!("Batch {} of {batch_count} failed", batch_index + 1);
                if let Some(progress) = progress {
                    progress.fail(Some(&message), Some("fail_fast"));
                }
                warn!(name = %options.name, batch = batch_index + 1, "stopping batch update after failure");
                aborted = Some(message);
                break;
            }
            if let Some(progress) = progress {
                progress.increment(
                    batch_len,
                    Some(&format!("Processed batch {} of {batch_count}", batch_index + 1)),
                );
            }
        }

        if let Some(reason) = aborted {
            for (index, _) in pending {
                results.push(skipped(&options.name, index, &reason));
            }
        } else if let Some(progress) = progress
            && !progress.state().is_terminal()
        {
            progress.complete(Some("Batch update complete"));
        }

        info!(name = %options.name, total, "batch update finished");
        Ok(results)
    }

    /// Run `work` inside a document transaction.
    ///
    /// Commits when `work` succeeds; rolls back when it fails or when
    /// `options.timeout` expires first. A failed commit is also rolled back.
    pub async fn transaction<F, Fut, T, Er>(
        &self,
        name: &str,
        options: TransactionOptions,
        work: F,
    ) -> Result<T, RevitError>
    where
        F: FnOnce(TransactionId) -> Fut,
        Fut: Future<Output = Result<T, Er>>,
        Er: Into<BoxError>,
    {
        let id = self
            .document
            .begin_transaction(name)
            .await
            .map_err(|source| RevitError::TransactionStart {
                name: name.to_owned(),
                source,
            })?;
        debug!(%id, name, "transaction begun");

        let outcome = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, work(id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.rollback(id, name).await;
                    return Err(RevitError::TransactionTimeout {
                        name: name.to_owned(),
                        timeout: limit,
                    });
                }
            },
            None => work(id).await,
        };

        match outcome {
            Ok(value) => match self.document.commit(id).await {
                Ok(()) => {
                    debug!(%id, name, "transaction committed");
                    Ok(value)
                }
                Err(source) => {
                    self.rollback(id, name).await;
                    Err(RevitError::TransactionCommit { id, source })
                }
            },
            Err(err) => {
                self.rollback(id, name).await;
                Err(RevitError::TransactionAborted {
                    name: name.to_owned(),
                    source: TaskError::from_boxed(err.into()),
                })
            }
        }
    }

    /// Wait for one batch element. An element still pending once the queue
    /// has stopped would never run, so it is cancelled instead.
    async fn wait_for_member(&self, id: TaskId) -> Result<TaskResult, RevitError> {
        let poll = self.queue.config().poll_interval;
        loop {
            match self.queue.wait_for_task(id, Some(poll)).await {
                Ok(result) => return Ok(result),
                Err(QueueError::WaitTimeout { .. }) => {
                    if !self.queue.is_running()
                        && self.queue.get_task_status(id).await == Some(TaskStatus::Pending)
                    {
                        debug!(task_id = %id, "queue stopped under a pending batch element");
                        self.queue.cancel_task(id).await?;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn rollback(&self, id: TransactionId, name: &str) {
        match self.document.rollback(id).await {
            Ok(()) => debug!(%id, name, "transaction rolled back"),
            Err(e) => warn!(%id, name, error = %e, "rollback failed"),
        }
    }
}

/// Result for a batch element that was never started.
fn skipped(batch: &str, index: usize, reason: &str) -> TaskResult {
    Task::new(
        format!("{batch}[{index}]"),
        Work::from_async(|_ctx| async { Ok::<_, BoxError>(()) }),
    )
    .with_metadata("index", index)
    .cancel_pending(Some(reason.to_owned()))
}
