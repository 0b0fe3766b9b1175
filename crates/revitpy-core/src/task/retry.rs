//! Retry policy: how many extra attempts and how long to wait between them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;

/// Constant-delay retry policy.
///
/// `retry_count` extra attempts are made after the first one, each preceded
/// by the same `retry_delay`. There is no jitter and no exponential growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retry_count: u32,

    /// Pause between a failed attempt and the next one.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn new(retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            retry_count,
            retry_delay,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    ///
    /// Constant backoff: every gap is `retry_delay`.
    pub fn next_delay(&self, _attempt: u32) -> Duration {
        self.retry_delay
    }

    /// Sleep for the backoff, returning early if `token` cancels.
    pub(crate) async fn backoff(&self, attempt: u32, token: Option<&CancellationToken>) {
        let delay = self.next_delay(attempt);
        if delay.is_zero() {
            return;
        }
        match token {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
