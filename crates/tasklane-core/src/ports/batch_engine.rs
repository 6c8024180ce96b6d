//! BatchEngine port - バッチ実行エンジン（外部コラボレータ）
//!
//! Job / Step の実行記録はバッチエンジンが所有します。
//! この層は読み取りと restart / stop / delete の委譲だけを行います。

use async_trait::async_trait;

use crate::domain::{
    JobExecution, JobExecutionFilter, JobExecutionId, JobInstance, JobInstanceId, StepExecution,
};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("job execution {0} not found")]
    NotFound(JobExecutionId),

    #[error("batch engine refused: {0}")]
    Rejected(String),

    #[error("batch engine unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BatchEngine: Send + Sync {
    /// All job executions matching `filter`, in no particular order.
    async fn list_job_executions(
        &self,
        filter: &JobExecutionFilter,
    ) -> Result<Vec<JobExecution>, BatchError>;

    async fn job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, BatchError>;

    async fn step_executions(&self, id: JobExecutionId) -> Result<Vec<StepExecution>, BatchError>;

    async fn job_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, BatchError>;

    async fn job_executions_for_instance(
        &self,
        id: JobInstanceId,
    ) -> Result<Vec<JobExecution>, BatchError>;

    /// Restart inside the engine; returns the new job execution id.
    async fn restart_job_execution(&self, id: JobExecutionId) -> Result<JobExecutionId, BatchError>;

    async fn stop_job_execution(&self, id: JobExecutionId) -> Result<(), BatchError>;

    async fn delete_job_execution(&self, id: JobExecutionId) -> Result<(), BatchError>;
}
