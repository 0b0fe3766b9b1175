use serde::{Deserialize, Serialize};

/// Snapshot of queue counters and current sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_queued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,

    pub pending: usize,
    pub running: usize,
    pub completed: usize,

    pub max_concurrent_tasks: usize,
    pub is_running: bool,
}
