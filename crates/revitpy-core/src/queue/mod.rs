//! Priority task queue with a fixed worker pool.

mod error;
mod pending;
mod stats;
mod task_queue;
mod worker;

pub use error::QueueError;
pub use stats::QueueStats;
pub use task_queue::TaskQueue;
