//! Progress snapshot value object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller-specific key/value sidecar attached to a report.
pub type ReportData = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressState::Completed | ProgressState::Failed | ProgressState::Cancelled
        )
    }
}

/// Immutable snapshot handed to progress callbacks.
///
/// `total == 0` means the amount of work is unknown (indeterminate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub current: u64,
    pub total: u64,
    pub message: Option<String>,
    pub state: ProgressState,
    #[serde(default)]
    pub data: ReportData,
    pub timestamp: DateTime<Utc>,
}

impl ProgressReport {
    pub fn is_indeterminate(&self) -> bool {
        self.total == 0
    }

    /// Percentage in `[0, 100]`, or `None` when indeterminate.
    pub fn percentage(&self) -> Option<f64> {
        if self.is_indeterminate() {
            return None;
        }
        let pct = self.current as f64 / self.total as f64 * 100.0;
        Some(pct.clamp(0.0, 100.0))
    }

    pub fn is_complete(&self) -> bool {
        self.state == ProgressState::Completed || (self.total > 0 && self.current >= self.total)
    }
}
