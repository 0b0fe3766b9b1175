//! Domain - ID・優先度・状態・結果の値型
//!
//! ここにある型は I/O を持たない。queue と task の両方から使う。

pub mod ids;
pub mod priority;
pub mod result;
pub mod status;

pub use ids::{Id, IdMarker, TaskId, TransactionId};
pub use priority::TaskPriority;
pub use result::{SharedError, TaskError, TaskResult};
pub use status::TaskStatus;
