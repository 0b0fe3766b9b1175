//! Worker pool - [`TaskQueue`](super::TaskQueue) を駆動するワーカー群
//!
//! # フロー
//! 1. `next_task()` で最優先の pending タスクを1件取る（pending -> running）
//! 2. 専用の tokio タスク内で `Task::execute()` を実行
//! 3. 結果を completed に記録し、統計を更新

use std::sync::Arc;

use serde_json::Map;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::task_queue::Shared;
use crate::domain::result::ResultHeader;
use crate::domain::{TaskError, TaskResult};
use crate::error::panic_message;

/// Handle on a set of worker loops.
///
/// - Sending `true` (or dropping the group) stops every worker.
/// - `join()` waits for all of them to exit.
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub(crate) fn spawn(n: usize, shared: Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, shared, rx))
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Ask every worker to exit after its current task. In-flight work is
    /// not interrupted.
    pub(crate) fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn join(self) {
        let Self { shutdown_tx, joins } = self;
        for join in joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker exited abnormally");
            }
        }
        drop(shutdown_tx);
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 1) 実行できるタスクを1件取る（stop を poll_interval ごとに確認）
        let next = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped: the queue is gone
                    break;
                }
                continue;
            }
            next = shared.next_task() => next,
        };
        let Some(mut task) = next else {
            continue;
        };

        // 2) 専用の tokio タスクで実行（panic してもワーカーは生き残る）
        let task_id = task.id();
        let joined = tokio::spawn(async move { task.execute().await }).await;
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(&*join_err.into_panic())
                } else {
                    "task execution aborted".to_owned()
                };
                error!(worker_id, %task_id, error = %message, "task execution died");
                let Some(running) = shared.take_running(task_id).await else {
                    continue;
                };
                let header = ResultHeader {
                    task_id,
                    name: running.name,
                    execution_time: running.started_at.elapsed(),
                    attempts: 0,
                    metadata: Map::new(),
                };
                TaskResult::failed(header, TaskError::Panicked(message))
            }
        };
        // 3) 結果を completed へ（running からは外れる）
        shared.record_completion(result).await;
    }
    debug!(worker_id, "worker stopped");
}
