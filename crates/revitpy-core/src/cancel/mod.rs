//! Cooperative cancellation.
//!
//! Cancellation is advisory: nothing is interrupted. Work observes a token
//! by polling [`CancellationToken::is_cancelled`], calling
//! [`CancellationToken::throw_if_cancellation_requested`] at its own check
//! points, or awaiting [`CancellationToken::cancelled`].

mod source;
mod token;

pub use source::{CancellationTokenSource, combine_tokens};
pub use token::{CancelCallback, CancellationToken, OperationCancelled};
