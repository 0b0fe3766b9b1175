//! Tasks: wrapped work plus timeout, retry, cancellation and progress.

mod combinators;
mod context;
mod retry;
#[allow(clippy::module_inception)]
mod task;
mod work;

pub use combinators::{cancellable, with_retry, with_timeout};
pub use context::TaskContext;
pub use retry::RetryPolicy;
pub(crate) use retry::duration_ms;
pub use task::{CompletionCallback, Task};
pub use work::{Work, WorkResult};
