//! State - 実行レコードとバッチジョブの状態
//!
//! # 状態遷移（ExecutionStatus）
//! - Pending → Launching → Running → {Completed, Failed}
//! - Launching → LaunchFailed（launcher の拒否・通信失敗・タイムアウト）
//! - Pending | Launching → Failed（CancelledBeforeLaunch）
//!
//! Orchestrator が持つのは Running までの遷移だけで、終端遷移は
//! status sync 側の責務です。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a task execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Row reserved, launcher not yet invoked.
    Pending,

    /// Launcher call in flight.
    Launching,

    /// Launcher accepted the request and returned an external run id.
    Running,

    Completed,

    Failed,

    /// Launcher rejected the request, failed in transport or timed out.
    LaunchFailed,
}

impl ExecutionStatus {
    /// No further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::LaunchFailed
        )
    }

    /// States whose deletion would orphan live work.
    pub fn is_live(self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::Launching)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Launching)
                | (Pending, Failed)
                | (Launching, Running)
                | (Launching, LaunchFailed)
                | (Launching, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Launching => "LAUNCHING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::LaunchFailed => "LAUNCH_FAILED",
        };
        f.write_str(s)
    }
}

/// Why an execution ended up in a failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    /// Cancelled while `PENDING` or `LAUNCHING`.
    CancelledBeforeLaunch,

    LauncherRejected(String),

    /// The launcher did not answer in time; the external fate is unknown.
    LaunchTimeout,

    /// A `PENDING` row nobody picked up (crash between reservation and launch).
    Orphaned,

    /// The task itself exited unsuccessfully.
    TaskFailed(String),
}

/// Batch status of a job execution, as reported by the batch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Abandoned,
    Unknown,
}

impl JobStatus {
    /// Restart is only allowed from these states.
    pub fn is_restartable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Stopped)
    }

    /// Currently active (stop is meaningful).
    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Started)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde 表現と同じ綴りに揃える
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::reserve_to_launch(ExecutionStatus::Pending, ExecutionStatus::Launching, true)]
    #[case::cancel_pending(ExecutionStatus::Pending, ExecutionStatus::Failed, true)]
    #[case::accepted(ExecutionStatus::Launching, ExecutionStatus::Running, true)]
    #[case::rejected(ExecutionStatus::Launching, ExecutionStatus::LaunchFailed, true)]
    #[case::finished(ExecutionStatus::Running, ExecutionStatus::Completed, true)]
    #[case::skip_launching(ExecutionStatus::Pending, ExecutionStatus::Running, false)]
    #[case::running_cannot_launch_fail(ExecutionStatus::Running, ExecutionStatus::LaunchFailed, false)]
    #[case::terminal_is_final(ExecutionStatus::Completed, ExecutionStatus::Running, false)]
    fn execution_transitions(
        #[case] from: ExecutionStatus,
        #[case] to: ExecutionStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[rstest]
    #[case(JobStatus::Failed, true)]
    #[case(JobStatus::Stopped, true)]
    #[case(JobStatus::Started, false)]
    #[case(JobStatus::Completed, false)]
    #[case(JobStatus::Abandoned, false)]
    fn job_status_restartability(#[case] status: JobStatus, #[case] restartable: bool) {
        assert_eq!(status.is_restartable(), restartable);
    }

    #[test]
    fn statuses_serialize_in_screaming_snake_case() {
        let s = serde_json::to_string(&ExecutionStatus::LaunchFailed).unwrap();
        assert_eq!(s, "\"LAUNCH_FAILED\"");
        assert_eq!(JobStatus::Stopping.to_string(), "STOPPING");
    }

    #[test]
    fn live_states_block_deletion() {
        assert!(ExecutionStatus::Running.is_live());
        assert!(ExecutionStatus::Launching.is_live());
        assert!(!ExecutionStatus::Pending.is_live());
        assert!(!ExecutionStatus::Completed.is_live());
    }
}
