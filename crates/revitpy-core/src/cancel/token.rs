//! Cooperative cancellation token.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::error::panic_message;

/// Callback invoked once when a token is cancelled.
pub type CancelCallback = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Raised by cooperative check points that observe a cancelled token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation cancelled{}", reason_suffix(.reason))]
pub struct OperationCancelled {
    reason: Option<String>,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl OperationCancelled {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// A cloneable handle on shared cancellation state.
///
/// All clones observe the same state. Consumers can only read the state and
/// register callbacks; cancelling goes through the owning
/// [`CancellationTokenSource`](super::CancellationTokenSource).
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    state: Mutex<TokenState>,
    notify: Notify,
}

#[derive(Default)]
struct TokenState {
    cancelled_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    callbacks: Vec<CancelCallback>,
}

impl CancellationToken {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TokenState::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().cancelled_at
    }

    pub fn reason(&self) -> Option<String> {
        self.lock_state().reason.clone()
    }

    /// True when both handles refer to the same underlying token.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a callback to run when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately on
    /// the calling thread and is not stored.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        {
            let mut state = self.lock_state();
            if !self.is_cancelled() {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        self.invoke(Box::new(callback));
    }

    /// Cooperative check point.
    pub fn throw_if_cancellation_requested(&self) -> Result<(), OperationCancelled> {
        if self.is_cancelled() {
            Err(OperationCancelled::new(self.reason()))
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled (immediately if it already is).
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Flip the token. Returns false if it was already cancelled.
    ///
    /// Callbacks run in registration order after the state lock is released.
    pub(crate) fn cancel(&self, reason: Option<String>) -> bool {
        let callbacks = {
            let mut state = self.lock_state();
            if self.is_cancelled() {
                return false;
            }
            state.cancelled_at = Some(Utc::now());
            state.reason = reason;
            self.inner.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut state.callbacks)
        };

        debug!(
            reason = ?self.reason(),
            callbacks = callbacks.len(),
            "cancellation requested"
        );
        self.inner.notify.notify_waiters();

        for callback in callbacks {
            self.invoke(callback);
        }
        true
    }

    fn invoke(&self, callback: CancelCallback) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(self))) {
            error!(
                panic = %panic_message(panic.as_ref()),
                "cancellation callback panicked"
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn callbacks_fire_once_in_registration_order() {
        let token = CancellationToken::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            token.register_callback(move |_| order.lock().unwrap().push(i));
        }

        assert!(token.cancel(Some("first".into())));
        assert!(!token.cancel(Some("second".into())));

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(token.reason().as_deref(), Some("first"));
    }

    #[test]
    fn registering_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel(None);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        token.register_callback(move |t| {
            assert!(t.is_cancelled());
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // not stored: a second cancel does not re-run it
        token.cancel(None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_rest() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        token.register_callback(|_| panic!("boom"));
        let h = Arc::clone(&hits);
        token.register_callback(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel(None);
        assert!(token.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn throw_if_cancellation_requested_carries_reason() {
        let token = CancellationToken::new();
        assert!(token.throw_if_cancellation_requested().is_ok());

        token.cancel(Some("user abort".into()));
        let err = token.throw_if_cancellation_requested().unwrap_err();
        assert_eq!(err.reason(), Some("user abort"));
        assert_eq!(err.to_string(), "operation cancelled: user abort");
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel(None);

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
