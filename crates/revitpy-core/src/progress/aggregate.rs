//! Fan-in of several child reporters into one parent.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::report::ProgressState;
use super::reporter::ProgressReporter;

#[derive(Debug, Clone, Copy)]
struct ChildSlot {
    current: u64,
    total: u64,
    state: ProgressState,
}

/// Aggregates child reporters: the parent shows the sum of child currents
/// over the sum of child totals.
///
/// The parent finishes once every child is terminal: failed if any child
/// failed, cancelled if any child was cancelled, completed otherwise.
pub struct ProgressAggregator {
    parent: ProgressReporter,
    slots: Arc<Mutex<Vec<ChildSlot>>>,
}

impl ProgressAggregator {
    pub fn new(parent: ProgressReporter) -> Self {
        Self {
            parent,
            slots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn parent(&self) -> &ProgressReporter {
        &self.parent
    }

    /// Start the parent session.
    pub fn start(&self, message: Option<&str>) {
        self.parent.start(message);
    }

    /// Create a child reporter covering `total` units of work.
    pub fn child(&self, total: u64) -> ProgressReporter {
        // children notify on every change; the parent applies its own throttle
        let child = ProgressReporter::with_throttle(total, Duration::ZERO);
        let index = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.push(ChildSlot {
                current: 0,
                total,
                state: ProgressState::NotStarted,
            });
            slots.len() - 1
        };

        let slots = Arc::clone(&self.slots);
        let parent = self.parent.clone();
        child.add_callback(move |report| {
            let (current, total, finished) = {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(slot) = slots.get_mut(index) {
                    *slot = ChildSlot {
                        current: report.current,
                        total: report.total,
                        state: report.state,
                    };
                }
                let current = slots.iter().map(|s| s.current).sum::<u64>();
                let total = slots.iter().map(|s| s.total).sum::<u64>();
                let finished = if slots.iter().all(|s| s.state.is_terminal()) {
                    Some(overall_state(&slots))
                } else {
                    None
                };
                (current, total, finished)
            };

            match finished {
                Some(ProgressState::Failed) => parent.fail(report.message.as_deref(), None),
                Some(ProgressState::Cancelled) => parent.cancel(report.message.as_deref()),
                Some(_) => parent.complete(report.message.as_deref()),
                None if parent.state() == ProgressState::InProgress => {
                    parent.report_progress(current, total, report.message.as_deref())
                }
                None => {}
            }
        });
        child
    }
}

fn overall_state(slots: &[ChildSlot]) -> ProgressState {
    if slots.iter().any(|s| s.state == ProgressState::Failed) {
        ProgressState::Failed
    } else if slots.iter().any(|s| s.state == ProgressState::Cancelled) {
        ProgressState::Cancelled
    } else {
        ProgressState::Completed
    }
}
