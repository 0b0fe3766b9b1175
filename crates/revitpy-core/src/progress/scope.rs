//! Scoped progress session.

use std::ops::Deref;

use super::report::ProgressState;
use super::reporter::ProgressReporter;

/// Starts a reporter on creation and guarantees a terminal state on exit.
///
/// Call [`finish`](Self::finish) or [`fail`](Self::fail) to end the session
/// explicitly. A scope dropped while its reporter is still in progress
/// marks it cancelled.
#[must_use = "dropping the scope immediately cancels the progress session"]
pub struct ProgressScope {
    reporter: ProgressReporter,
}

impl ProgressScope {
    pub fn begin(reporter: ProgressReporter, total: u64, message: Option<&str>) -> Self {
        reporter.set_total(total);
        reporter.start(message);
        Self { reporter }
    }

    pub fn finish(self, message: Option<&str>) {
        self.reporter.complete(message);
    }

    pub fn fail(self, message: Option<&str>, error: Option<&str>) {
        self.reporter.fail(message, error);
    }
}

impl Deref for ProgressScope {
    type Target = ProgressReporter;

    fn deref(&self) -> &Self::Target {
        &self.reporter
    }
}

impl Drop for ProgressScope {
    fn drop(&mut self) {
        if self.reporter.state() == ProgressState::InProgress {
            self.reporter.cancel(Some("Operation cancelled"));
        }
    }
}
