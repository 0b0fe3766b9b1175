//! Progress reporting.

mod aggregate;
mod async_reporter;
mod report;
mod reporter;
mod scope;

pub use aggregate::ProgressAggregator;
pub use async_reporter::{AsyncProgressCallback, AsyncProgressReporter};
pub use report::{ProgressReport, ProgressState, ReportData};
pub use reporter::{CallbackId, DEFAULT_THROTTLE_INTERVAL, ProgressCallback, ProgressReporter};
pub use scope::ProgressScope;
