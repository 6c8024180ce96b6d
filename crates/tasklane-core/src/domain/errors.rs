//! Errors - エラー型と分類
//!
//! [`OrchestrationError`] は呼び出し側（CLI, HTTP など）にそのまま返す構造化エラーです。
//! [`ErrorKind`] で粗く分類し、表示層が HTTP ステータスや終了コードに
//! 対応付けられるようにします。

use std::time::Duration;

use super::ids::{ExecutionId, JobExecutionId, JobInstanceId};
use super::state::{ExecutionStatus, JobStatus};
use crate::ports::StorageError;

/// Coarse classification for presentation layers.
///
/// - Validation: 入力不正。副作用なし
/// - Conflict: 現在の状態では実行できない（running 中の削除など）
/// - PartialFailure: 実行 ID 予約後の失敗。レコードは失敗状態で残る
/// - Infrastructure: 永続化・外部サービスの障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    PartialFailure,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("task '{0}' already exists")]
    DuplicateTask(String),

    #[error("composed task '{task}' references unresolvable steps: {missing:?}")]
    InvalidComposedTask { task: String, missing: Vec<String> },

    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("no primary platform among {0:?}; a platform name is required")]
    NoPrimaryPlatform(Vec<String>),

    #[error("duplicate platform or launcher name '{0}'")]
    DuplicatePlatform(String),

    #[error("invalid platform configuration: {0}")]
    InvalidPlatformConfiguration(String),

    #[error("cannot resolve '{reference}': {reason}")]
    PropertyResolutionError { reference: String, reason: String },

    #[error("invalid property format: {0}")]
    InvalidPropertyFormat(String),

    #[error("launcher '{launcher}' did not answer within {timeout:?} for {execution_id}")]
    LaunchTimeout {
        execution_id: ExecutionId,
        launcher: String,
        timeout: Duration,
    },

    #[error("launcher '{launcher}' rejected {execution_id}: {reason}")]
    LauncherRejected {
        execution_id: ExecutionId,
        launcher: String,
        reason: String,
    },

    #[error("{execution_id} was cancelled before launch")]
    CancelledBeforeLaunch { execution_id: ExecutionId },

    #[error("cancel of {execution_id} failed: {reason}")]
    CancelFailed {
        execution_id: ExecutionId,
        reason: String,
    },

    #[error("executions still running: {0:?}")]
    ExecutionStillRunning(Vec<ExecutionId>),

    #[error("unknown task execution {0}")]
    UnknownExecution(ExecutionId),

    #[error("{execution_id} is {status} and cannot be cancelled")]
    NotCancellable {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("unknown job execution {0}")]
    UnknownJobExecution(JobExecutionId),

    #[error("unknown job instance {0}")]
    UnknownJobInstance(JobInstanceId),

    #[error("job execution {id} is {status}; only FAILED or STOPPED can be restarted")]
    JobNotRestartable { id: JobExecutionId, status: JobStatus },

    #[error("job execution {id} is {status}, not running")]
    JobNotRunning { id: JobExecutionId, status: JobStatus },

    #[error("batch engine error: {0}")]
    BatchEngine(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl OrchestrationError {
    pub fn kind(&self) -> ErrorKind {
        use OrchestrationError::*;
        match self {
            UnknownTask(_)
            | InvalidComposedTask { .. }
            | UnknownPlatform(_)
            | NoPrimaryPlatform(_)
            | DuplicatePlatform(_)
            | InvalidPlatformConfiguration(_)
            | PropertyResolutionError { .. }
            | InvalidPropertyFormat(_)
            | UnknownExecution(_)
            | UnknownJobExecution(_)
            | UnknownJobInstance(_) => ErrorKind::Validation,
            DuplicateTask(_)
            | ExecutionStillRunning(_)
            | NotCancellable { .. }
            | JobNotRestartable { .. }
            | JobNotRunning { .. } => ErrorKind::Conflict,
            LaunchTimeout { .. }
            | LauncherRejected { .. }
            | CancelledBeforeLaunch { .. }
            | CancelFailed { .. } => ErrorKind::PartialFailure,
            BatchEngine(_) | Storage(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unknown_task(OrchestrationError::UnknownTask("x".into()), ErrorKind::Validation)]
    #[case::no_primary(OrchestrationError::NoPrimaryPlatform(vec![]), ErrorKind::Validation)]
    #[case::running(OrchestrationError::ExecutionStillRunning(vec![ExecutionId::new(1)]), ErrorKind::Conflict)]
    #[case::timeout(
        OrchestrationError::LaunchTimeout {
            execution_id: ExecutionId::new(1),
            launcher: "l".into(),
            timeout: Duration::from_secs(1),
        },
        ErrorKind::PartialFailure
    )]
    #[case::storage(
        OrchestrationError::Storage(StorageError::Unavailable("down".into())),
        ErrorKind::Infrastructure
    )]
    fn errors_are_classified(#[case] error: OrchestrationError, #[case] kind: ErrorKind) {
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn messages_name_the_target() {
        let err = OrchestrationError::JobNotRestartable {
            id: JobExecutionId::new(5),
            status: JobStatus::Started,
        };
        let msg = err.to_string();
        assert!(msg.contains("jobexec-5"));
        assert!(msg.contains("STARTED"));
    }
}
