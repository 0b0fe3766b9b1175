//! The queue handle and its shared state.
//!
//! # Design
//! - A task lives in exactly one of `pending`, `running` or `completed`.
//!   Every move between them happens inside a single lock section.
//! - The lock is never held while user work runs. Workers take the task
//!   out of the heap and own it for the duration of `execute()`.
//! - `wait_for_task` polls the completed map with a short sleep.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::error::QueueError;
use super::pending::PendingEntry;
use super::stats::QueueStats;
use super::worker::WorkerGroup;
use crate::cancel::CancellationToken;
use crate::config::QueueConfig;
use crate::domain::{TaskId, TaskResult, TaskStatus};
use crate::error::BoxError;
use crate::task::{Task, TaskContext};

const STOP_REASON: &str = "Task queue stopped";
const CANCEL_REASON: &str = "Task cancelled";

/// Bookkeeping for a task a worker is executing.
pub(crate) struct RunningTask {
    pub(crate) name: String,
    pub(crate) token: Option<CancellationToken>,
    pub(crate) started_at: Instant,
}

#[derive(Default)]
struct Counters {
    total_queued: u64,
    total_completed: u64,
    total_failed: u64,
    total_cancelled: u64,
}

impl Counters {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => self.total_completed += 1,
            TaskStatus::Failed => self.total_failed += 1,
            TaskStatus::Cancelled => self.total_cancelled += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<PendingEntry>,
    pending_ids: HashSet<TaskId>,
    running: HashMap<TaskId, RunningTask>,
    completed: HashMap<TaskId, TaskResult>,
    counters: Counters,
}

impl QueueState {
    fn complete(&mut self, result: TaskResult) {
        self.counters.record(result.status());
        self.completed.insert(result.task_id(), result);
    }
}

/// State shared between the handle and its workers.
pub(crate) struct Shared {
    pub(crate) config: QueueConfig,
    running: AtomicBool,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Shared {
    /// Pop the next task and mark it running.
    ///
    /// Waits at most one poll interval; `None` means the worker should
    /// re-check its stop signal.
    pub(crate) async fn next_task(&self) -> Option<Task> {
        loop {
            {
                let mut state = self.state.lock().await;
                if !self.running.load(Ordering::SeqCst) {
                    return None;
                }
                if let Some(entry) = state.pending.pop() {
                    let task = entry.task;
                    state.pending_ids.remove(&task.id());
                    state.running.insert(
                        task.id(),
                        RunningTask {
                            name: task.name().to_owned(),
                            token: task.cancellation_token().cloned(),
                            started_at: Instant::now(),
                        },
                    );
                    return Some(task);
                }
            }

            if tokio::time::timeout(self.config.poll_interval, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Move a finished task from running to completed.
    pub(crate) async fn record_completion(&self, result: TaskResult) {
        let mut state = self.state.lock().await;
        state.running.remove(&result.task_id());
        state.complete(result);
    }

    /// Remove a running entry, e.g. when its execution died.
    pub(crate) async fn take_running(&self, task_id: TaskId) -> Option<RunningTask> {
        self.state.lock().await.running.remove(&task_id)
    }
}

/// Priority-ordered, optionally bounded task queue executing on a fixed
/// number of worker loops.
///
/// Created stopped. Tasks can only be enqueued while running; tasks left
/// pending by `stop()` are picked up again by the next `start()`.
pub struct TaskQueue {
    shared: Arc<Shared>,
    workers: Mutex<Option<WorkerGroup>>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
            workers: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Spawn `max_concurrent_tasks` workers. No-op if already running.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let n = self.shared.config.max_concurrent_tasks;
        *workers = Some(WorkerGroup::spawn(n, Arc::clone(&self.shared)));
        info!(workers = n, "task queue started");
    }

    /// Stop the workers and signal the tokens of in-flight tasks.
    ///
    /// Waits up to `timeout` (forever if `None`) for workers to finish their
    /// current task. Workers still busy after that are detached and record
    /// their result when done. No-op if already stopped.
    pub async fn stop(&self, timeout: Option<Duration>) {
        let mut workers = self.workers.lock().await;
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(group) = workers.take() else {
            return;
        };
        group.request_shutdown();

        {
            let state = self.shared.state.lock().await;
            for (task_id, running) in &state.running {
                if let Some(token) = &running.token {
                    debug!(%task_id, name = %running.name, "cancelling in-flight task");
                    token.cancel(Some(STOP_REASON.to_owned()));
                }
            }
        }

        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, group.join()).await.is_err() {
                    warn!(?limit, "workers did not stop in time; detaching");
                }
            }
            None => group.join().await,
        }
        info!("task queue stopped");
    }

    /// Place `task` in the pending queue.
    pub async fn enqueue(&self, task: Task) -> Result<TaskId, QueueError> {
        if !self.is_running() {
            return Err(QueueError::NotRunning);
        }
        let task_id = task.id();
        {
            let mut state = self.shared.state.lock().await;
            if let Some(capacity) = self.shared.config.max_queue_size
                && state.pending.len() >= capacity
            {
                return Err(QueueError::Full { capacity });
            }
            debug!(%task_id, name = %task.name(), priority = %task.priority(), "task enqueued");
            state.pending_ids.insert(task_id);
            state.pending.push(PendingEntry::new(task));
            state.counters.total_queued += 1;
        }
        self.shared.notify.notify_one();
        Ok(task_id)
    }

    /// Wrap async work in a default-priority task and enqueue it.
    pub async fn submit<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<TaskId, QueueError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.enqueue(Task::from_async(name, f)).await
    }

    /// Wrap synchronous work in a default-priority task and enqueue it.
    pub async fn submit_blocking<F, T, E>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<TaskId, QueueError>
    where
        F: Fn(TaskContext) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Into<BoxError>,
    {
        self.enqueue(Task::from_blocking(name, f)).await
    }

    /// Wait until `task_id` has a result.
    ///
    /// Fails immediately with `TaskNotFound` if the id is in none of the
    /// three collections, and with `WaitTimeout` once `timeout` elapses.
    pub async fn wait_for_task(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Result<TaskResult, QueueError> {
        let deadline = timeout.map(|t| (Instant::now() + t, t));
        loop {
            {
                let state = self.shared.state.lock().await;
                if let Some(result) = state.completed.get(&task_id) {
                    return Ok(result.clone());
                }
                if !state.pending_ids.contains(&task_id) && !state.running.contains_key(&task_id) {
                    return Err(QueueError::TaskNotFound(task_id));
                }
            }

            let mut nap = self.shared.config.wait_poll_interval;
            if let Some((deadline, timeout)) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(QueueError::WaitTimeout { task_id, timeout });
                }
                nap = nap.min(remaining);
            }
            tokio::time::sleep(nap).await;
        }
    }

    pub async fn get_task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        let state = self.shared.state.lock().await;
        if let Some(result) = state.completed.get(&task_id) {
            Some(result.status())
        } else if state.running.contains_key(&task_id) {
            Some(TaskStatus::Running)
        } else if state.pending_ids.contains(&task_id) {
            Some(TaskStatus::Pending)
        } else {
            None
        }
    }

    pub async fn get_task_result(&self, task_id: TaskId) -> Option<TaskResult> {
        self.shared.state.lock().await.completed.get(&task_id).cloned()
    }

    /// Cancel a task by id.
    ///
    /// A pending task is removed and finalized as cancelled. A running task
    /// has its token signalled (a token shared with other tasks cancels them
    /// too). Returns whether anything was cancelled; a task already finished
    /// or running without a token yields `false`.
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<bool, QueueError> {
        let mut state = self.shared.state.lock().await;

        if state.pending_ids.remove(&task_id) {
            let mut kept = Vec::with_capacity(state.pending.len());
            let mut target = None;
            for entry in std::mem::take(&mut state.pending) {
                if entry.task.id() == task_id {
                    target = Some(entry.task);
                } else {
                    kept.push(entry);
                }
            }
            state.pending = BinaryHeap::from(kept);
            if let Some(mut task) = target {
                let result = task.cancel_pending(Some(CANCEL_REASON.to_owned()));
                state.complete(result);
                return Ok(true);
            }
        }

        if let Some(running) = state.running.get(&task_id) {
            return Ok(match &running.token {
                Some(token) => token.cancel(Some(CANCEL_REASON.to_owned())),
                None => false,
            });
        }

        if state.completed.contains_key(&task_id) {
            return Ok(false);
        }
        Err(QueueError::TaskNotFound(task_id))
    }

    /// Evict completed results, all of them or only those finished at least
    /// `older_than` ago. Returns how many were evicted.
    pub async fn clear_completed(&self, older_than: Option<Duration>) -> usize {
        let mut state = self.shared.state.lock().await;
        let before = state.completed.len();
        match older_than {
            None => state.completed.clear(),
            Some(age) => {
                let now = Utc::now();
                state.completed.retain(|_, result| {
                    (now - result.completed_at())
                        .to_std()
                        .map_or(true, |elapsed| elapsed < age)
                });
            }
        }
        before - state.completed.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    pub async fn running_count(&self) -> usize {
        self.shared.state.lock().await.running.len()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock().await;
        QueueStats {
            total_queued: state.counters.total_queued,
            total_completed: state.counters.total_completed,
            total_failed: state.counters.total_failed,
            total_cancelled: state.counters.total_cancelled,
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed.len(),
            max_concurrent_tasks: self.shared.config.max_concurrent_tasks,
            is_running: self.is_running(),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::cancel::CancellationTokenSource;
    use crate::domain::TaskPriority;

    fn config(workers: usize) -> QueueConfig {
        QueueConfig::default()
            .with_max_concurrent_tasks(workers)
            .with_poll_interval(Duration::from_millis(20))
    }

    async fn started(workers: usize) -> TaskQueue {
        let queue = TaskQueue::new(config(workers));
        queue.start().await;
        queue
    }

    #[tokio::test]
    async fn enqueue_requires_running_queue() {
        let queue = TaskQueue::new(config(1));
        let err = queue
            .submit("t", |_| async { Ok::<_, BoxError>(1) })
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::NotRunning);
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow() {
        let queue = TaskQueue::new(config(1).with_max_queue_size(1));
        queue.start().await;

        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        queue
            .submit("blocker", move |_| {
                let g = Arc::clone(&g);
                async move {
                    g.notified().await;
                    Ok::<_, BoxError>(())
                }
            })
            .await
            .unwrap();
        // let the single worker pick up the blocker
        while queue.running_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        queue.submit("queued", |_| async { Ok::<_, BoxError>(()) }).await.unwrap();
        let err = queue
            .submit("overflow", |_| async { Ok::<_, BoxError>(()) })
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 1 });

        gate.notify_one();
        queue.stop(Some(Duration::from_secs(1))).await;
    }

    #[tokio::test]
    async fn submit_and_wait_returns_result() {
        let queue = started(2).await;
        let id = queue
            .submit("answer", |_| async { Ok::<_, BoxError>(42) })
            .await
            .unwrap();

        let result = queue.wait_for_task(id, Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(result.status(), TaskStatus::Completed);
        assert_eq!(result.result(), Some(&serde_json::json!(42)));
        assert_eq!(queue.get_task_status(id).await, Some(TaskStatus::Completed));
        assert!(queue.get_task_result(id).await.is_some());

        let stats = queue.stats().await;
        assert_eq!(stats.total_queued, 1);
        assert_eq!(stats.total_completed, 1);
        queue.stop(None).await;
    }

    #[tokio::test]
    async fn blocking_submission_runs() {
        let queue = started(1).await;
        let id = queue
            .submit_blocking("sum", |_| Ok::<_, BoxError>((1..=4).sum::<u32>()))
            .await
            .unwrap();
        let result = queue.wait_for_task(id, Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(result.result(), Some(&serde_json::json!(10)));
        queue.stop(None).await;
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let queue = started(1).await;
        let ghost = TaskId::generate();

        assert_eq!(queue.get_task_status(ghost).await, None);
        assert!(queue.get_task_result(ghost).await.is_none());
        assert_eq!(
            queue.wait_for_task(ghost, None).await.unwrap_err(),
            QueueError::TaskNotFound(ghost)
        );
        assert_eq!(
            queue.cancel_task(ghost).await.unwrap_err(),
            QueueError::TaskNotFound(ghost)
        );
        queue.stop(None).await;
    }

    #[tokio::test]
    async fn wait_times_out_on_slow_task() {
        let queue = started(1).await;
        let id = queue
            .submit("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(())
            })
            .await
            .unwrap();

        let err = queue
            .wait_for_task(id, Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::WaitTimeout { task_id, .. } if task_id == id));
        queue.stop(Some(Duration::from_millis(10))).await;
    }

    #[tokio::test]
    async fn cancel_pending_task_finalizes_it() {
        let queue = started(1).await;
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        queue
            .submit("blocker", move |_| {
                let g = Arc::clone(&g);
                async move {
                    g.notified().await;
                    Ok::<_, BoxError>(())
                }
            })
            .await
            .unwrap();
        while queue.running_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let victim = queue.submit("victim", |_| async { Ok::<_, BoxError>(()) }).await.unwrap();
        assert_eq!(queue.get_task_status(victim).await, Some(TaskStatus::Pending));
        assert!(queue.cancel_task(victim).await.unwrap());

        let result = queue.get_task_result(victim).await.unwrap();
        assert_eq!(result.status(), TaskStatus::Cancelled);
        assert_eq!(result.attempts(), 0);
        assert_eq!(queue.pending_count().await, 0);
        assert!(!queue.cancel_task(victim).await.unwrap());

        gate.notify_one();
        queue.stop(Some(Duration::from_secs(1))).await;
        assert_eq!(queue.stats().await.total_cancelled, 1);
    }

    #[tokio::test]
    async fn cancel_running_task_signals_its_token() {
        let queue = started(1).await;
        let source = CancellationTokenSource::new();
        let task = Task::from_async("cooperative", |ctx: TaskContext| async move {
            if let Some(token) = ctx.token() {
                token.cancelled().await;
            }
            ctx.check_cancelled()?;
            Ok::<_, BoxError>(())
        })
        .with_cancellation_token(source.token());
        let id = queue.enqueue(task).await.unwrap();
        while queue.get_task_status(id).await != Some(TaskStatus::Running) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(queue.cancel_task(id).await.unwrap());
        let result = queue.wait_for_task(id, Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(result.status(), TaskStatus::Cancelled);
        queue.stop(None).await;
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_tokens_and_keeps_pending() {
        let queue = started(1).await;
        let source = CancellationTokenSource::new();
        let in_flight = Task::from_async("in-flight", |ctx: TaskContext| async move {
            if let Some(token) = ctx.token() {
                token.cancelled().await;
            }
            ctx.check_cancelled()?;
            Ok::<_, BoxError>(())
        })
        .with_cancellation_token(source.token());
        let running_id = queue.enqueue(in_flight).await.unwrap();
        while queue.running_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let waiting_id = queue
            .submit("waiting", |_| async { Ok::<_, BoxError>("later") })
            .await
            .unwrap();

        queue.stop(Some(Duration::from_secs(1))).await;
        assert!(!queue.is_running());
        assert!(source.is_cancelled());
        assert_eq!(source.token().reason().as_deref(), Some(STOP_REASON));
        assert_eq!(
            queue.get_task_status(running_id).await,
            Some(TaskStatus::Cancelled)
        );
        assert_eq!(queue.get_task_status(waiting_id).await, Some(TaskStatus::Pending));

        queue.start().await;
        let result = queue
            .wait_for_task(waiting_id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(result.result(), Some(&serde_json::json!("later")));
        queue.stop(None).await;
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let queue = TaskQueue::new(config(2));
        queue.stop(None).await;
        queue.start().await;
        queue.start().await;
        assert!(queue.is_running());
        assert_eq!(queue.stats().await.max_concurrent_tasks, 2);
        queue.stop(None).await;
        queue.stop(None).await;
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn single_worker_dispatches_by_priority() {
        let queue = TaskQueue::new(config(1));
        queue.start().await;

        // occupy the worker so later submissions pile up
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        let blocker = queue
            .submit("blocker", move |_| {
                let g = Arc::clone(&g);
                async move {
                    g.notified().await;
                    Ok::<_, BoxError>(())
                }
            })
            .await
            .unwrap();
        while queue.running_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut ids = Vec::new();
        for (name, priority) in [
            ("low", TaskPriority::Low),
            ("normal-a", TaskPriority::Normal),
            ("critical", TaskPriority::Critical),
            ("normal-b", TaskPriority::Normal),
            ("high", TaskPriority::High),
        ] {
            let order = Arc::clone(&order);
            let task = Task::from_async(name, move |_| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(name);
                    Ok::<_, BoxError>(())
                }
            })
            .with_priority(priority);
            ids.push(queue.enqueue(task).await.unwrap());
        }

        gate.notify_one();
        queue.wait_for_task(blocker, Some(Duration::from_secs(2))).await.unwrap();
        for id in ids {
            queue.wait_for_task(id, Some(Duration::from_secs(2))).await.unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            ["critical", "high", "normal-a", "normal-b", "low"]
        );
        queue.stop(None).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn running_tasks_never_exceed_worker_count() {
        let queue = started(3).await;
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut ids = Vec::new();
        for i in 0..20 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let id = queue
                .submit(format!("burst-{i}"), move |_| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(())
                    }
                })
                .await
                .unwrap();
            ids.push(id);
        }
        for id in ids {
            queue.wait_for_task(id, Some(Duration::from_secs(5))).await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.stats().await.total_completed, 20);
        queue.stop(None).await;
    }

    #[tokio::test]
    async fn clear_completed_evicts_by_age() {
        let queue = started(1).await;
        let old = queue.submit("old", |_| async { Ok::<_, BoxError>(()) }).await.unwrap();
        queue.wait_for_task(old, Some(Duration::from_secs(2))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let fresh = queue.submit("fresh", |_| async { Ok::<_, BoxError>(()) }).await.unwrap();
        queue.wait_for_task(fresh, Some(Duration::from_secs(2))).await.unwrap();

        assert_eq!(queue.clear_completed(Some(Duration::from_millis(50))).await, 1);
        assert!(queue.get_task_result(old).await.is_none());
        assert!(queue.get_task_result(fresh).await.is_some());
        assert_eq!(queue.clear_completed(None).await, 1);
        assert_eq!(queue.stats().await.completed, 0);
        queue.stop(None).await;
    }
}
