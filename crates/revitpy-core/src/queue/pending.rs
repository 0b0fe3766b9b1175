//! Heap entry for not-yet-started tasks.

use std::cmp::Ordering;

use crate::domain::TaskPriority;
use crate::task::Task;

/// A pending task keyed for `BinaryHeap` (a max-heap).
///
/// Higher priority pops first; within one priority the lower creation
/// sequence (older task) pops first.
pub(crate) struct PendingEntry {
    priority: TaskPriority,
    sequence: u64,
    pub(crate) task: Task,
}

impl PendingEntry {
    pub(crate) fn new(task: Task) -> Self {
        Self {
            priority: task.priority(),
            sequence: task.sequence(),
            task,
        }
    }
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // Reverse: earlier sequence is "greater" so it pops first
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn task(name: &str, priority: TaskPriority) -> Task {
        Task::from_blocking(name, |_| Ok::<_, std::io::Error>(()))
            .with_priority(priority)
    }

    #[test]
    fn heap_pops_by_priority_then_age() {
        let mut heap = BinaryHeap::new();
        for (name, priority) in [
            ("low", TaskPriority::Low),
            ("normal-1", TaskPriority::Normal),
            ("critical", TaskPriority::Critical),
            ("normal-2", TaskPriority::Normal),
            ("high", TaskPriority::High),
        ] {
            heap.push(PendingEntry::new(task(name, priority)));
        }

        let order: Vec<String> = std::iter::from_fn(|| heap.pop())
            .map(|entry| entry.task.name().to_owned())
            .collect();
        assert_eq!(order, ["critical", "high", "normal-1", "normal-2", "low"]);
    }
}
