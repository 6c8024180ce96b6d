//! ExecutionStore port - 実行レコード・デプロイメントレコードの正本（source of truth）
//!
//! ExecutionStore は以下を管理します：
//! - TaskExecution（起動試行ごとに 1 行）
//! - TaskDeployment（launcher が受理した実行ごとに 1 行）
//! - TaskExecution <-> JobExecution の対応関係
//!
//! # 設計原則
//! - 実行・デプロイメント行を変更できるのはこの port だけ
//! - 実行 ID の採番は 1 か所で直列化する
//! - 実行とデプロイメントは同じ単位で書き込み・削除する（片方だけ見えることはない）
//! - 相関の読み出しは 1 回のロック／トランザクションで行う

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{
    ExecutionId, ExecutionStatus, ExecutionView, FailureReason, JobExecutionId, NewExecution,
    Page, Pageable, TaskDeployment, TaskExecution, TransitionError,
};
use crate::observability::ExecutionCounts;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("storage timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Deployment fields supplied by the orchestrator once a launcher accepted.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub launcher_name: String,
    pub platform_name: String,
    pub external_run_id: String,
}

/// Result of a cancel request evaluated under the store lock.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Was PENDING/LAUNCHING; now FAILED with `CancelledBeforeLaunch`.
    CancelledBeforeLaunch(TaskExecution),
    /// Not cancellable in the store; the caller decides (e.g. launcher cancel).
    Untouched(ExecutionView),
}

/// Listing filter. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub task_name: Option<String>,
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &TaskExecution) -> bool {
        self.task_name
            .as_deref()
            .is_none_or(|name| name == execution.task_name)
            && self.status.is_none_or(|s| s == execution.status)
    }
}

/// One execution removed together with everything hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedExecution {
    pub execution: TaskExecution,
    pub deployment: Option<TaskDeployment>,
    pub job_execution_ids: Vec<JobExecutionId>,
    /// Removed while still live (force flag); the process was not touched.
    pub forced: bool,
}

/// Outcome of one deletion unit.
#[derive(Debug, Clone, Default)]
pub struct DeletionBatch {
    pub removed: Vec<RemovedExecution>,
    /// Live executions left in place because `force` was not set.
    pub refused: Vec<(ExecutionId, ExecutionStatus)>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Reserve a new PENDING row with a fresh id.
    async fn create_execution(&self, new: NewExecution) -> Result<TaskExecution, StorageError>;

    /// PENDING -> LAUNCHING. Fails with `InvalidTransition` if the row was
    /// cancelled in the meantime.
    async fn begin_launch(&self, id: ExecutionId) -> Result<TaskExecution, StorageError>;

    /// Writes the run id and the deployment row in one unit. LAUNCHING rows
    /// move to RUNNING; rows cancelled during the launcher call keep their
    /// FAILED status.
    async fn record_launch(
        &self,
        id: ExecutionId,
        deployment: NewDeployment,
    ) -> Result<(TaskExecution, TaskDeployment), StorageError>;

    /// LAUNCHING -> LAUNCH_FAILED.
    async fn mark_launch_failed(
        &self,
        id: ExecutionId,
        reason: FailureReason,
    ) -> Result<TaskExecution, StorageError>;

    async fn cancel_before_launch(&self, id: ExecutionId) -> Result<CancelOutcome, StorageError>;

    /// RUNNING -> COMPLETED/FAILED from an exit code.
    async fn complete_execution(
        &self,
        id: ExecutionId,
        exit_code: i32,
        exit_message: Option<String>,
    ) -> Result<TaskExecution, StorageError>;

    /// Any non-terminal state -> FAILED (PENDING/RUNNING) or LAUNCH_FAILED (LAUNCHING).
    async fn fail_execution(
        &self,
        id: ExecutionId,
        reason: FailureReason,
    ) -> Result<TaskExecution, StorageError>;

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<TaskExecution>, StorageError>;

    async fn execution_view(&self, id: ExecutionId) -> Result<Option<ExecutionView>, StorageError>;

    /// Newest first.
    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        pageable: Pageable,
    ) -> Result<Page<TaskExecution>, StorageError>;

    async fn execution_ids_for_task(&self, task_name: &str) -> Result<Vec<ExecutionId>, StorageError>;

    /// RUNNING executions with their deployment rows.
    async fn running_deployments(&self) -> Result<Vec<(TaskExecution, TaskDeployment)>, StorageError>;

    /// Executions in `status` not touched since `before`.
    async fn stale_executions(
        &self,
        status: ExecutionStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<TaskExecution>, StorageError>;

    async fn link_job_execution(
        &self,
        id: ExecutionId,
        job_execution_id: JobExecutionId,
    ) -> Result<(), StorageError>;

    async fn correlations_for_jobs(
        &self,
        job_execution_ids: &[JobExecutionId],
    ) -> Result<HashMap<JobExecutionId, TaskExecution>, StorageError>;

    /// Removes executions, deployments and correlations in one unit. Live
    /// executions are skipped unless `force` is set. Unknown ids are ignored.
    ///
    /// With `all_or_nothing`, one live row (without `force`) leaves every row
    /// in place; the batch then lists the live rows as refused and removes
    /// nothing. The check and the removal happen under the same lock.
    async fn delete_executions(
        &self,
        ids: &[ExecutionId],
        all_or_nothing: bool,
        force: bool,
    ) -> Result<DeletionBatch, StorageError>;

    async fn counts_by_status(&self) -> Result<ExecutionCounts, StorageError>;
}
