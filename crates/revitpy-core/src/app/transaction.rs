use std::time::Duration;

/// Options for [`AsyncRevit::transaction`](super::AsyncRevit::transaction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Bound on the whole transaction body. Expiry rolls back.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
