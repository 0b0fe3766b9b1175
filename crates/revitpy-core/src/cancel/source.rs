//! Owner side of a cancellation token.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::token::CancellationToken;

const DISPOSED_REASON: &str = "disposed";
const TIMEOUT_REASON: &str = "timeout";

/// Owns exactly one [`CancellationToken`] and is the only way to cancel it.
///
/// An optional timer cancels the token automatically after a delay.
/// Dropping the source releases the timer without cancelling.
pub struct CancellationTokenSource {
    token: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            timer: Mutex::new(None),
        }
    }

    /// Source whose token cancels itself after `timeout`.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let source = Self::new();
        source.cancel_after(timeout, Some(TIMEOUT_REASON));
        source
    }

    /// The token owned by this source. Every call returns a handle on the
    /// same token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token. No-op if it is already cancelled.
    pub fn cancel(&self, reason: Option<&str>) {
        self.token.cancel(reason.map(str::to_owned));
    }

    /// (Re)schedule automatic cancellation. A previously scheduled timer is
    /// dropped.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn cancel_after(&self, delay: Duration, reason: Option<&str>) {
        let token = self.token.clone();
        let reason = reason.map(str::to_owned);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(?delay, "cancellation timer fired");
            token.cancel(reason);
        });

        if let Some(previous) = self.lock_timer().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel (reason "disposed") if still live and release the timer.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        self.token.cancel(Some(DISPOSED_REASON.to_owned()));
        self.release_timer();
    }

    fn release_timer(&self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.abort();
        }
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationTokenSource {
    fn drop(&mut self) {
        self.release_timer();
    }
}

impl std::fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationTokenSource")
            .field("token", &self.token)
            .finish()
    }
}

/// Token that cancels the first time any of `tokens` cancels.
///
/// The combined reason is `"Combined token cancelled due to: <reason>"`,
/// taken from the first constituent to cancel. If a constituent is already
/// cancelled the combined token is returned cancelled.
pub fn combine_tokens(tokens: &[CancellationToken]) -> CancellationToken {
    let combined = CancellationToken::new();

    if let Some(already) = tokens.iter().find(|t| t.is_cancelled()) {
        combined.cancel(Some(combined_reason(already)));
        return combined;
    }

    for token in tokens {
        let target = combined.clone();
        token.register_callback(move |source| {
            target.cancel(Some(combined_reason(source)));
        });
    }
    combined
}

fn combined_reason(source: &CancellationToken) -> String {
    format!(
        "Combined token cancelled due to: {}",
        source.reason().unwrap_or_else(|| "unspecified".to_owned())
    )
}
