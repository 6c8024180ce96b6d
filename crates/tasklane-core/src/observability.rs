//! Observability - 実行状態ごとの件数

use serde::{Deserialize, Serialize};

use crate::domain::ExecutionStatus;

/// Execution counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub pending: usize,
    pub launching: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub launch_failed: usize,
}

impl ExecutionCounts {
    pub fn record(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Pending => self.pending += 1,
            ExecutionStatus::Launching => self.launching += 1,
            ExecutionStatus::Running => self.running += 1,
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::LaunchFailed => self.launch_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.launching + self.running + self.completed + self.failed + self.launch_failed
    }
}
