//! Options for [`AsyncRevit::batch_update`](super::AsyncRevit::batch_update).

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::config::BatchConfig;
use crate::domain::TaskPriority;
use crate::progress::ProgressReporter;

/// How a batch update is chunked, observed and aborted.
///
/// By default every element is processed and every result collected, even
/// after failures. `fail_fast` stops scheduling new batches once a batch
/// contains a failure.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub name: String,
    pub batch_size: usize,
    pub delay: Duration,
    pub priority: TaskPriority,
    pub fail_fast: bool,
    pub progress: Option<ProgressReporter>,
    pub cancellation_token: Option<CancellationToken>,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            name: "batch_update".to_owned(),
            batch_size: config.batch_size.max(1),
            delay: config.delay,
            priority: TaskPriority::default(),
            fail_fast: false,
            progress: None,
            cancellation_token: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}
