//! Observable progress state machine with throttled notification.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::error;

use super::report::{ProgressReport, ProgressState, ReportData};
use crate::error::panic_message;

/// Default minimum gap between two non-terminal notifications.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Synchronous progress observer.
pub type ProgressCallback = Arc<dyn Fn(&ProgressReport) + Send + Sync>;

/// Handle returned by [`ProgressReporter::add_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// What an update does to the counters.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Change {
    Start,
    Increment(u64),
    Set(u64),
    Report { current: u64, total: u64 },
    Finish(ProgressState),
}

/// Cloneable handle on a shared progress state machine.
///
/// `not_started -> in_progress -> {completed, failed, cancelled}`.
/// Progress updates inside `throttle_interval` of the previous notification
/// are recorded but not announced, unless they reach 100%. Start and
/// terminal transitions are always announced.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    throttle: Duration,
    next_callback_id: AtomicU64,
    state: Mutex<ReporterState>,
}

struct ReporterState {
    current: u64,
    total: u64,
    state: ProgressState,
    message: Option<String>,
    start_time: Option<Instant>,
    last_notified: Option<Instant>,
    callbacks: Vec<(CallbackId, ProgressCallback)>,
}

impl ProgressReporter {
    pub fn new(total: u64) -> Self {
        Self::with_throttle(total, DEFAULT_THROTTLE_INTERVAL)
    }

    pub fn with_throttle(total: u64, throttle: Duration) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                throttle,
                next_callback_id: AtomicU64::new(1),
                state: Mutex::new(ReporterState {
                    current: 0,
                    total,
                    state: ProgressState::NotStarted,
                    message: None,
                    start_time: None,
                    last_notified: None,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    pub fn throttle_interval(&self) -> Duration {
        self.inner.throttle
    }

    pub fn current(&self) -> u64 {
        self.lock().current
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn state(&self) -> ProgressState {
        self.lock().state
    }

    /// Snapshot of the current state without notifying anyone.
    pub fn report(&self) -> ProgressReport {
        snapshot(&self.lock(), ReportData::new())
    }

    /// Takes effect in the next notification.
    pub fn set_total(&self, total: u64) {
        self.lock().total = total;
    }

    pub fn add_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&ProgressReport) + Send + Sync + 'static,
    {
        let id = CallbackId(self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.lock().callbacks.push((id, Arc::new(callback)));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut state = self.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|(cb_id, _)| *cb_id != id);
        state.callbacks.len() != before
    }

    pub fn start(&self, message: Option<&str>) {
        self.update(Change::Start, message, ReportData::new());
    }

    pub fn increment(&self, amount: u64, message: Option<&str>) {
        self.update(Change::Increment(amount), message, ReportData::new());
    }

    pub fn increment_with_data(&self, amount: u64, message: Option<&str>, data: ReportData) {
        self.update(Change::Increment(amount), message, data);
    }

    pub fn set_progress(&self, current: u64, message: Option<&str>) {
        self.update(Change::Set(current), message, ReportData::new());
    }

    pub fn set_progress_with_data(&self, current: u64, message: Option<&str>, data: ReportData) {
        self.update(Change::Set(current), message, data);
    }

    pub fn report_progress(&self, current: u64, total: u64, message: Option<&str>) {
        self.update(Change::Report { current, total }, message, ReportData::new());
    }

    pub fn report_progress_with_data(
        &self,
        current: u64,
        total: u64,
        message: Option<&str>,
        data: ReportData,
    ) {
        self.update(Change::Report { current, total }, message, data);
    }

    pub fn complete(&self, message: Option<&str>) {
        self.complete_with_data(message, ReportData::new());
    }

    pub fn complete_with_data(&self, message: Option<&str>, data: ReportData) {
        self.update(Change::Finish(ProgressState::Completed), message, data);
    }

    /// Mark as failed. `error` is exposed to observers as `data["error"]`.
    pub fn fail(&self, message: Option<&str>, error: Option<&str>) {
        let mut data = ReportData::new();
        if let Some(error) = error {
            data.insert("error".into(), Value::String(error.to_owned()));
        }
        self.update(Change::Finish(ProgressState::Failed), message, data);
    }

    pub fn cancel(&self, message: Option<&str>) {
        self.update(
            Change::Finish(ProgressState::Cancelled),
            message,
            ReportData::new(),
        );
    }

    /// Time since `start`, or `None` if never started.
    pub fn elapsed_time(&self) -> Option<Duration> {
        self.lock().start_time.map(|t| t.elapsed())
    }

    /// Linear extrapolation from the observed rate.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let state = self.lock();
        let elapsed = state.start_time?.elapsed().as_secs_f64();
        if state.state.is_terminal() || state.total == 0 || state.current >= state.total {
            return None;
        }
        if state.current == 0 || elapsed <= 0.0 {
            return None;
        }
        let rate = state.current as f64 / elapsed;
        let remaining = (state.total - state.current) as f64 / rate;
        Some(Duration::from_secs_f64(remaining))
    }

    /// Apply a change and notify observers unless throttled.
    ///
    /// Returns the report that was announced, if any.
    pub(crate) fn update(
        &self,
        change: Change,
        message: Option<&str>,
        data: ReportData,
    ) -> Option<ProgressReport> {
        let (report, callbacks) = {
            let mut state = self.lock();
            if matches!(change, Change::Increment(_)) && state.state == ProgressState::Completed {
                // increments saturate once the work is done
                return None;
            }
            let always_notify = apply_change(&mut state, change);
            if let Some(message) = message {
                state.message = Some(message.to_owned());
            }

            let report = snapshot(&state, data);
            let reached_end = report.percentage().is_some_and(|p| p >= 100.0);
            let throttled = !always_notify
                && !reached_end
                && state
                    .last_notified
                    .is_some_and(|last| last.elapsed() < self.inner.throttle);
            if throttled {
                return None;
            }

            state.last_notified = Some(Instant::now());
            let callbacks: Vec<ProgressCallback> =
                state.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (report, callbacks)
        };

        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&report))) {
                error!(
                    panic = %panic_message(panic.as_ref()),
                    "progress callback panicked"
                );
            }
        }
        Some(report)
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mutate counters for `change`. Returns true when the change must bypass
/// throttling.
fn apply_change(state: &mut ReporterState, change: Change) -> bool {
    match change {
        Change::Start => {
            begin_session(state);
            true
        }
        Change::Finish(terminal) => {
            if terminal == ProgressState::Completed && state.total > 0 {
                state.current = state.total;
            }
            state.state = terminal;
            true
        }
        Change::Increment(_) | Change::Set(_) | Change::Report { .. } => {
            if state.state != ProgressState::InProgress {
                // updates outside a session open a new one
                begin_session(state);
            }
            match change {
                Change::Increment(amount) => state.current = state.current.saturating_add(amount),
                Change::Set(current) => state.current = current,
                Change::Report { current, total } => {
                    state.total = total;
                    state.current = current;
                }
                Change::Start | Change::Finish(_) => {}
            }
            if state.total > 0 {
                state.current = state.current.min(state.total);
                if state.current >= state.total {
                    state.state = ProgressState::Completed;
                }
            }
            false
        }
    }
}

fn begin_session(state: &mut ReporterState) {
    state.state = ProgressState::InProgress;
    state.current = 0;
    state.start_time = Some(Instant::now());
}

fn snapshot(state: &ReporterState, data: ReportData) -> ProgressReport {
    ProgressReport {
        current: state.current,
        total: state.total,
        message: state.message.clone(),
        state: state.state,
        data,
        timestamp: Utc::now(),
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProgressReporter")
            .field("current", &state.current)
            .field("total", &state.total)
            .field("state", &state.state)
            .finish()
    }
}
