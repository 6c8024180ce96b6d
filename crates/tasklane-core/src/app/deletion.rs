//! DeletionCoordinator - 実行レコードのカスケード削除
//!
//! # ポリシー
//! - 実行レコードとデプロイメントレコード・ジョブ対応は同じ単位で消す
//! - RUNNING / LAUNCHING の実行は force なしでは消さない
//!   - id 指定: 1 件でも該当すれば全体を `ExecutionStillRunning` で拒否
//!   - タスク名指定: 消せるものだけ消し、残りは refused として返す
//! - force でも外部プロセスは止めない（レコードの削除のみ。停止は cancel で行う）
//! - バッチエンジン側のジョブ記録は `delete_job_records` 指定時のみ削除
//! - 何を消したかを監査レコードに残す

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::audit::Auditor;
use super::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{
    AuditAction, AuditOutcome, CallerContext, ExecutionId, ExecutionStatus, JobExecutionId,
    OrchestrationError,
};
use crate::ports::{BatchEngine, DeletionBatch, ExecutionStore, RemovedExecution};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionTarget {
    Ids(Vec<ExecutionId>),
    TaskName(String),
}

impl DeletionTarget {
    fn describe(&self) -> String {
        match self {
            DeletionTarget::Ids(ids) => ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            DeletionTarget::TaskName(name) => format!("task:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Remove live executions too (bookkeeping only).
    pub force: bool,
    /// Also delete the batch engine's job execution records.
    pub delete_job_records: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefusedDeletion {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub removed: Vec<RemovedExecution>,
    /// Live executions left in place.
    pub refused: Vec<RefusedDeletion>,
    pub job_records_deleted: Vec<JobExecutionId>,
    pub job_record_failures: Vec<(JobExecutionId, String)>,
}

impl DeletionReport {
    fn from_batch(batch: DeletionBatch) -> Self {
        Self {
            removed: batch.removed,
            refused: batch
                .refused
                .into_iter()
                .map(|(execution_id, status)| RefusedDeletion {
                    execution_id,
                    status,
                })
                .collect(),
            job_records_deleted: Vec::new(),
            job_record_failures: Vec::new(),
        }
    }

    /// Something was asked for and not done.
    pub fn is_partial(&self) -> bool {
        !self.refused.is_empty() || !self.job_record_failures.is_empty()
    }

    /// Removed while live; their processes may still be running.
    pub fn forced(&self) -> Vec<ExecutionId> {
        self.removed
            .iter()
            .filter(|r| r.forced)
            .map(|r| r.execution.execution_id)
            .collect()
    }

    fn audit_outcome(&self) -> AuditOutcome {
        if !self.is_partial() {
            return AuditOutcome::Success;
        }
        let mut reasons = Vec::new();
        if !self.refused.is_empty() {
            reasons.push(format!("{} still running", self.refused.len()));
        }
        if !self.job_record_failures.is_empty() {
            reasons.push(format!("{} job records not deleted", self.job_record_failures.len()));
        }
        AuditOutcome::Partial(reasons.join("; "))
    }

    fn audit_data(&self, options: DeleteOptions) -> serde_json::Value {
        let removed: Vec<serde_json::Value> = self
            .removed
            .iter()
            .map(|r| {
                json!({
                    "execution_id": r.execution.execution_id.value(),
                    "task": r.execution.task_name,
                    "status": r.execution.status,
                    "deployment": r.deployment.as_ref().map(|d| json!({
                        "launcher": d.launcher_name,
                        "platform": d.platform_name,
                        "run_id": d.external_run_id,
                    })),
                    "job_execution_ids": r.job_execution_ids.iter().map(|j| j.value()).collect::<Vec<_>>(),
                    "forced": r.forced,
                })
            })
            .collect();
        json!({
            "force": options.force,
            "delete_job_records": options.delete_job_records,
            "removed": removed,
            "refused": self.refused,
            "job_records_deleted": self.job_records_deleted.iter().map(|j| j.value()).collect::<Vec<_>>(),
        })
    }
}

pub struct DeletionCoordinator {
    store: Arc<dyn ExecutionStore>,
    batch: Arc<dyn BatchEngine>,
    auditor: Auditor,
    store_timeout: Duration,
}

impl DeletionCoordinator {
    pub fn new(store: Arc<dyn ExecutionStore>, batch: Arc<dyn BatchEngine>, auditor: Auditor) -> Self {
        Self {
            store,
            batch,
            auditor,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub async fn delete(
        &self,
        target: DeletionTarget,
        options: DeleteOptions,
        caller: &CallerContext,
    ) -> Result<DeletionReport, OrchestrationError> {
        let result = self.delete_inner(&target, options).await;
        match &result {
            Ok(report) => {
                self.auditor
                    .record(
                        AuditAction::Delete,
                        target.describe(),
                        caller,
                        report.audit_outcome(),
                        report.audit_data(options),
                    )
                    .await;
            }
            Err(e) => {
                self.auditor
                    .record(
                        AuditAction::Delete,
                        target.describe(),
                        caller,
                        AuditOutcome::Failure(e.to_string()),
                        json!({ "force": options.force }),
                    )
                    .await;
            }
        }
        result
    }

    async fn delete_inner(
        &self,
        target: &DeletionTarget,
        options: DeleteOptions,
    ) -> Result<DeletionReport, OrchestrationError> {
        let (ids, all_or_nothing) = match target {
            DeletionTarget::Ids(ids) => {
                self.check_known(ids).await?;
                (ids.clone(), true)
            }
            DeletionTarget::TaskName(name) => (
                bounded(self.store_timeout, self.store.execution_ids_for_task(name)).await?,
                false,
            ),
        };

        let batch = bounded(
            self.store_timeout,
            self.store.delete_executions(&ids, all_or_nothing, options.force),
        )
        .await?;
        if all_or_nothing && !batch.refused.is_empty() {
            return Err(OrchestrationError::ExecutionStillRunning(
                batch.refused.iter().map(|(id, _)| *id).collect(),
            ));
        }
        let mut report = DeletionReport::from_batch(batch);

        for removed in &report.removed {
            if removed.forced {
                tracing::warn!(
                    execution_id = %removed.execution.execution_id,
                    status = %removed.execution.status,
                    "forced deletion of live execution; process not stopped"
                );
            } else {
                tracing::info!(execution_id = %removed.execution.execution_id, "execution deleted");
            }
        }
        for refused in &report.refused {
            tracing::warn!(execution_id = %refused.execution_id, status = %refused.status, "deletion refused; execution still running");
        }

        if options.delete_job_records {
            let job_ids: Vec<JobExecutionId> = report
                .removed
                .iter()
                .flat_map(|r| r.job_execution_ids.iter().copied())
                .collect();
            for job_id in job_ids {
                match self.batch.delete_job_execution(job_id).await {
                    Ok(()) => report.job_records_deleted.push(job_id),
                    Err(e) => {
                        tracing::warn!(job_execution_id = %job_id, error = %e, "job record not deleted");
                        report.job_record_failures.push((job_id, e.to_string()));
                    }
                }
            }
        }

        Ok(report)
    }

    /// Every id must exist.
    async fn check_known(&self, ids: &[ExecutionId]) -> Result<(), OrchestrationError> {
        for &id in ids {
            if bounded(self.store_timeout, self.store.get_execution(id)).await?.is_none() {
                return Err(OrchestrationError::UnknownExecution(id));
            }
        }
        Ok(())
    }
}
