//! Progress reporter with awaitable observers.

use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use super::report::{ProgressReport, ProgressState, ReportData};
use super::reporter::{Change, ProgressReporter};
use crate::BoxFuture;
use crate::error::BoxError;

pub type AsyncProgressCallback =
    Arc<dyn Fn(ProgressReport) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A [`ProgressReporter`] that can also await asynchronous observers.
///
/// The `async_*` methods perform the synchronous update first (synchronous
/// callbacks included) and then await each async callback in registration
/// order. Throttled updates do not reach async callbacks either.
/// The synchronous API is available through `Deref`.
#[derive(Clone)]
pub struct AsyncProgressReporter {
    reporter: ProgressReporter,
    async_callbacks: Arc<Mutex<Vec<AsyncProgressCallback>>>,
}

impl AsyncProgressReporter {
    pub fn new(total: u64) -> Self {
        Self::from_reporter(ProgressReporter::new(total))
    }

    pub fn from_reporter(reporter: ProgressReporter) -> Self {
        Self {
            reporter,
            async_callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn add_async_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(ProgressReport) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let callback: AsyncProgressCallback =
            Arc::new(move |report| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(callback(report))
            });
        self.async_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub async fn async_start(&self, message: Option<&str>) {
        self.dispatch(Change::Start, message, ReportData::new()).await;
    }

    pub async fn async_increment(&self, amount: u64, message: Option<&str>) {
        self.dispatch(Change::Increment(amount), message, ReportData::new())
            .await;
    }

    pub async fn async_report_progress(&self, current: u64, total: u64, message: Option<&str>) {
        self.dispatch(Change::Report { current, total }, message, ReportData::new())
            .await;
    }

    pub async fn async_complete(&self, message: Option<&str>) {
        self.dispatch(
            Change::Finish(ProgressState::Completed),
            message,
            ReportData::new(),
        )
        .await;
    }

    pub async fn async_fail(&self, message: Option<&str>) {
        self.dispatch(
            Change::Finish(ProgressState::Failed),
            message,
            ReportData::new(),
        )
        .await;
    }

    pub async fn async_cancel(&self, message: Option<&str>) {
        self.dispatch(
            Change::Finish(ProgressState::Cancelled),
            message,
            ReportData::new(),
        )
        .await;
    }

    async fn dispatch(&self, change: Change, message: Option<&str>, data: ReportData) {
        let Some(report) = self.reporter.update(change, message, data) else {
            return;
        };

        let callbacks: Vec<AsyncProgressCallback> = self
            .async_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in callbacks {
            // each observer runs in its own task so a panic stays contained
            let fut = callback(report.clone());
            match tokio::spawn(fut).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "async progress callback failed"),
                Err(join_err) => error!(error = %join_err, "async progress callback panicked"),
            }
        }
    }
}

impl Deref for AsyncProgressReporter {
    type Target = ProgressReporter;

    fn deref(&self) -> &Self::Target {
        &self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn async_callbacks_run_in_order_after_sync_update() {
        let reporter = AsyncProgressReporter::from_reporter(ProgressReporter::with_throttle(
            4,
            Duration::ZERO,
        ));
        let log = Arc::new(Mutex::new(Vec::new()));

        let sync_log = Arc::clone(&log);
        reporter.add_callback(move |r| sync_log.lock().unwrap().push(format!("sync:{}", r.current)));

        for name in ["a", "b"] {
            let log = Arc::clone(&log);
            reporter.add_async_callback(move |r| {
                let log = Arc::clone(&log);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().unwrap().push(format!("{name}:{}", r.current));
                    Ok(())
                }
            });
        }

        reporter.async_start(None).await;
        reporter.async_increment(2, None).await;

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec!["sync:0", "a:0", "b:0", "sync:2", "a:2", "b:2"]
        );
    }

    #[tokio::test]
    async fn failing_async_callback_does_not_propagate() {
        let reporter = AsyncProgressReporter::new(1);
        reporter.add_async_callback(|_| async { Err::<(), BoxError>("observer down".into()) });
        reporter.add_async_callback(|_| async {
            if true {
                panic!("observer bug");
            }
            Ok::<(), BoxError>(())
        });

        reporter.async_start(None).await;
        reporter.async_complete(Some("ok")).await;
        assert_eq!(reporter.state(), ProgressState::Completed);
    }
}
