//! JobBridge - タスク実行とバッチジョブ実行の橋渡し
//!
//! ジョブ実行の記録はバッチエンジンが持ち、この層は
//! execution id ↔ job execution id の対応だけを ExecutionStore に保持します。
//!
//! # restart
//! - FAILED / STOPPED 以外は `JobNotRestartable`
//! - 対応するタスク実行があれば Orchestrator の launch 経路で再起動
//!   （元の実行の resolved properties を使う）
//! - 対応がなければバッチエンジン側の restart に委譲

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::audit::Auditor;
use super::orchestrator::TaskExecutionOrchestrator;
use super::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::job::sort_by_start_time;
use crate::domain::{
    AuditAction, AuditOutcome, CallerContext, ExecutionId, JobExecution, JobExecutionDetail,
    JobExecutionFilter, JobExecutionId, JobExecutionView, JobInstanceId, JobInstanceView,
    OrchestrationError, Page, Pageable,
};
use crate::ports::{BatchEngine, BatchError, ExecutionStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The owning task was launched again.
    Relaunched(ExecutionId),
    /// No owning task; the batch engine restarted the job itself.
    RestartedInEngine(JobExecutionId),
}

pub struct JobBridge {
    orchestrator: Arc<TaskExecutionOrchestrator>,
    store: Arc<dyn ExecutionStore>,
    batch: Arc<dyn BatchEngine>,
    auditor: Auditor,
    store_timeout: Duration,
}

impl JobBridge {
    pub fn new(
        orchestrator: Arc<TaskExecutionOrchestrator>,
        store: Arc<dyn ExecutionStore>,
        batch: Arc<dyn BatchEngine>,
        auditor: Auditor,
    ) -> Self {
        Self {
            orchestrator,
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

    /// Records that `job_execution_id` was produced by `execution_id`.
    pub async fn correlate(
        &self,
        execution_id: ExecutionId,
        job_execution_id: JobExecutionId,
    ) -> Result<(), OrchestrationError> {
        self.require_job(job_execution_id).await?;
        bounded(
            self.store_timeout,
            self.store.link_job_execution(execution_id, job_execution_id),
        )
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => OrchestrationError::UnknownExecution(execution_id),
            other => other.into(),
        })?;
        tracing::debug!(execution_id = %execution_id, job_execution_id = %job_execution_id, "job execution correlated");
        Ok(())
    }

    /// Job executions ordered by start time, each joined with its task
    /// execution (if any) through one store read.
    pub async fn list_job_executions(
        &self,
        filter: &JobExecutionFilter,
        pageable: Pageable,
    ) -> Result<Page<JobExecutionView>, OrchestrationError> {
        let mut executions = self.batch.list_job_executions(filter).await.map_err(batch_error)?;
        sort_by_start_time(&mut executions);
        let page = Page::from_ordered(executions, pageable);

        let ids: Vec<JobExecutionId> = page.items.iter().map(|j| j.id).collect();
        let mut correlations =
            bounded(self.store_timeout, self.store.correlations_for_jobs(&ids)).await?;

        Ok(page.map(|job_execution| JobExecutionView {
            task_execution: correlations.remove(&job_execution.id),
            job_execution,
        }))
    }

    pub async fn job_execution(&self, id: JobExecutionId) -> Result<JobExecutionDetail, OrchestrationError> {
        let job_execution = self.require_job(id).await?;
        let steps = self.batch.step_executions(id).await.map_err(batch_error)?;
        let mut correlations =
            bounded(self.store_timeout, self.store.correlations_for_jobs(&[id])).await?;
        Ok(JobExecutionDetail {
            job_execution,
            task_execution: correlations.remove(&id),
            steps,
        })
    }

    pub async fn job_instance(&self, id: JobInstanceId) -> Result<JobInstanceView, OrchestrationError> {
        let instance = self
            .batch
            .job_instance(id)
            .await
            .map_err(batch_error)?
            .ok_or(OrchestrationError::UnknownJobInstance(id))?;
        let mut executions = self
            .batch
            .job_executions_for_instance(id)
            .await
            .map_err(batch_error)?;
        sort_by_start_time(&mut executions);
        Ok(JobInstanceView {
            instance,
            executions,
        })
    }

    /// All job executions produced by one task execution, start time ascending.
    pub async fn job_executions_for_task(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<JobExecution>, OrchestrationError> {
        let view = bounded(self.store_timeout, self.store.execution_view(execution_id))
            .await?
            .ok_or(OrchestrationError::UnknownExecution(execution_id))?;

        let mut executions = Vec::with_capacity(view.job_execution_ids.len());
        for id in view.job_execution_ids {
            match self.batch.job_execution(id).await.map_err(batch_error)? {
                Some(job) => executions.push(job),
                None => tracing::debug!(job_execution_id = %id, "correlated job execution no longer in batch engine"),
            }
        }
        sort_by_start_time(&mut executions);
        Ok(executions)
    }

    pub async fn restart(
        &self,
        id: JobExecutionId,
        caller: &CallerContext,
    ) -> Result<RestartOutcome, OrchestrationError> {
        let result = self.restart_inner(id, caller).await;

        let (outcome, data) = match &result {
            Ok(RestartOutcome::Relaunched(exec)) => {
                (AuditOutcome::Success, json!({ "relaunched_execution_id": exec.value() }))
            }
            Ok(RestartOutcome::RestartedInEngine(job)) => {
                (AuditOutcome::Success, json!({ "new_job_execution_id": job.value() }))
            }
            Err(e) => (AuditOutcome::Failure(e.to_string()), serde_json::Value::Null),
        };
        self.auditor
            .record(AuditAction::Restart, id.to_string(), caller, outcome, data)
            .await;
        result
    }

    async fn restart_inner(
        &self,
        id: JobExecutionId,
        caller: &CallerContext,
    ) -> Result<RestartOutcome, OrchestrationError> {
        let job = self.require_job(id).await?;
        if !job.status.is_restartable() {
            return Err(OrchestrationError::JobNotRestartable {
                id,
                status: job.status,
            });
        }

        let mut correlations =
            bounded(self.store_timeout, self.store.correlations_for_jobs(&[id])).await?;
        match correlations.remove(&id) {
            Some(original) => {
                tracing::info!(
                    job_execution_id = %id,
                    execution_id = %original.execution_id,
                    task = %original.task_name,
                    "restarting job by relaunching its task"
                );
                let new_id = self.orchestrator.relaunch(&original, caller).await?;
                Ok(RestartOutcome::Relaunched(new_id))
            }
            None => {
                let new_job = self
                    .batch
                    .restart_job_execution(id)
                    .await
                    .map_err(batch_error)?;
                tracing::info!(job_execution_id = %id, new_job_execution_id = %new_job, "job restarted in batch engine");
                Ok(RestartOutcome::RestartedInEngine(new_job))
            }
        }
    }

    pub async fn stop(&self, id: JobExecutionId, caller: &CallerContext) -> Result<(), OrchestrationError> {
        let result = async {
            let job = self.require_job(id).await?;
            if !job.status.is_running() {
                return Err(OrchestrationError::JobNotRunning {
                    id,
                    status: job.status,
                });
            }
            self.batch.stop_job_execution(id).await.map_err(batch_error)
        }
        .await;

        let outcome = match &result {
            Ok(()) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.auditor
            .record(AuditAction::Stop, id.to_string(), caller, outcome, serde_json::Value::Null)
            .await;
        result
    }

    async fn require_job(&self, id: JobExecutionId) -> Result<JobExecution, OrchestrationError> {
        self.batch
            .job_execution(id)
            .await
            .map_err(batch_error)?
            .ok_or(OrchestrationError::UnknownJobExecution(id))
    }
}

fn batch_error(error: BatchError) -> OrchestrationError {
    match error {
        BatchError::NotFound(id) => OrchestrationError::UnknownJobExecution(id),
        other => OrchestrationError::BatchEngine(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::orchestrator::LaunchCommand;
    use crate::app::registry::PlatformRegistry;
    use crate::domain::{AppResource, JobStatus, Launcher, TaskDefinition, TaskPlatform};
    use crate::impls::{
        InMemoryAppRegistry, InMemoryAuditSink, InMemoryBatchEngine, InMemoryDefinitionStore,
        InMemoryExecutionStore, ScriptedLauncher,
    };
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::BTreeMap;

    struct Fixture {
        bridge: JobBridge,
        orchestrator: Arc<TaskExecutionOrchestrator>,
        batch: Arc<InMemoryBatchEngine>,
        store: Arc<InMemoryExecutionStore>,
        audit: Arc<InMemoryAuditSink>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let registry = PlatformRegistry::builder()
            .platform(
                TaskPlatform::new(
                    "local",
                    vec![Launcher::new("local1", "local", Arc::new(ScriptedLauncher::new()))],
                )
                .primary(),
            )
            .build()
            .unwrap();
        let apps = InMemoryAppRegistry::new();
        apps.register("ingest-app", AppResource::new("file:/opt/ingest")).await;
        let definitions =
            InMemoryDefinitionStore::with_definitions([TaskDefinition::new("ingest", "ingest-app")]);

        let store = Arc::new(InMemoryExecutionStore::new(clock.clone()));
        let batch = Arc::new(InMemoryBatchEngine::new(clock.clone()));
        let audit = Arc::new(InMemoryAuditSink::new());
        let auditor = Auditor::new(audit.clone(), Arc::new(UlidGenerator::new(clock.clone())), clock);

        let orchestrator = Arc::new(TaskExecutionOrchestrator::new(
            Arc::new(registry),
            Arc::new(definitions),
            Arc::new(apps),
            store.clone(),
            auditor.clone(),
        ));
        let bridge = JobBridge::new(orchestrator.clone(), store.clone(), batch.clone(), auditor);
        Fixture {
            bridge,
            orchestrator,
            batch,
            store,
            audit,
        }
    }

    fn at(secs: i64) -> Option<chrono::DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs))
    }

    #[tokio::test]
    async fn listing_joins_correlated_task_executions() {
        let f = fixture().await;
        let exec = f
            .orchestrator
            .launch(LaunchCommand::new("ingest"), &CallerContext::system())
            .await
            .unwrap();
        let instance = f.batch.create_instance("ingest").await;
        let later = f
            .batch
            .record_execution(instance, JobStatus::Completed, at(20), BTreeMap::new())
            .await
            .unwrap();
        let earlier = f
            .batch
            .record_execution(instance, JobStatus::Failed, at(10), BTreeMap::new())
            .await
            .unwrap();
        f.bridge.correlate(exec, later).await.unwrap();

        let page = f
            .bridge
            .list_job_executions(&JobExecutionFilter::default(), Pageable::default())
            .await
            .unwrap();
        let ids: Vec<JobExecutionId> = page.items.iter().map(|v| v.job_execution.id).collect();
        assert_eq!(ids, vec![earlier, later]);
        assert!(page.items[0].task_execution.is_none());
        assert_eq!(
            page.items[1].task_execution.as_ref().map(|t| t.execution_id),
            Some(exec)
        );
    }

    #[tokio::test]
    async fn multi_job_task_lists_all_in_start_order() {
        let f = fixture().await;
        let exec = f
            .orchestrator
            .launch(LaunchCommand::new("ingest"), &CallerContext::system())
            .await
            .unwrap();
        let instance = f.batch.create_instance("ingest").await;
        let second = f
            .batch
            .record_execution(instance, JobStatus::Completed, at(30), BTreeMap::new())
            .await
            .unwrap();
        let first = f
            .batch
            .record_execution(instance, JobStatus::Completed, at(5), BTreeMap::new())
            .await
            .unwrap();
        f.bridge.correlate(exec, second).await.unwrap();
        f.bridge.correlate(exec, first).await.unwrap();

        let jobs = f.bridge.job_executions_for_task(exec).await.unwrap();
        let ids: Vec<JobExecutionId> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn running_job_is_not_restartable() {
        let f = fixture().await;
        let instance = f.batch.create_instance("ingest").await;
        let running = f
            .batch
            .record_execution(instance, JobStatus::Started, at(0), BTreeMap::new())
            .await
            .unwrap();

        let err = f.bridge.restart(running, &CallerContext::system()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::JobNotRestartable { status: JobStatus::Started, .. }
        ));
        let records = f.audit.records_for(AuditAction::Restart).await;
        assert!(matches!(records[0].outcome, AuditOutcome::Failure(_)));
    }

    #[tokio::test]
    async fn correlated_failed_job_relaunches_its_task() {
        let f = fixture().await;
        let exec = f
            .orchestrator
            .launch(LaunchCommand::new("ingest"), &CallerContext::system())
            .await
            .unwrap();
        let instance = f.batch.create_instance("ingest").await;
        let failed = f
            .batch
            .record_execution(instance, JobStatus::Failed, at(0), BTreeMap::new())
            .await
            .unwrap();
        f.bridge.correlate(exec, failed).await.unwrap();

        let outcome = f.bridge.restart(failed, &CallerContext::system()).await.unwrap();
        let RestartOutcome::Relaunched(new_exec) = outcome else {
            panic!("expected relaunch, got {outcome:?}");
        };
        let relaunched = f.store.get_execution(new_exec).await.unwrap().unwrap();
        assert_eq!(relaunched.parent_execution_id, Some(exec));
        assert_eq!(relaunched.task_name, "ingest");
    }

    #[tokio::test]
    async fn uncorrelated_stopped_job_restarts_in_engine() {
        let f = fixture().await;
        let instance = f.batch.create_instance("ingest").await;
        let stopped = f
            .batch
            .record_execution(instance, JobStatus::Stopped, at(0), BTreeMap::new())
            .await
            .unwrap();

        let outcome = f.bridge.restart(stopped, &CallerContext::system()).await.unwrap();
        assert!(matches!(outcome, RestartOutcome::RestartedInEngine(id) if id != stopped));
    }

    #[tokio::test]
    async fn stop_requires_an_active_job() {
        let f = fixture().await;
        let instance = f.batch.create_instance("ingest").await;
        let done = f
            .batch
            .record_execution(instance, JobStatus::Completed, at(0), BTreeMap::new())
            .await
            .unwrap();
        let active = f
            .batch
            .record_execution(instance, JobStatus::Started, at(1), BTreeMap::new())
            .await
            .unwrap();

        assert!(matches!(
            f.bridge.stop(done, &CallerContext::system()).await,
            Err(OrchestrationError::JobNotRunning { .. })
        ));
        f.bridge.stop(active, &CallerContext::system()).await.unwrap();
        let job = f.batch.job_execution(active).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let f = fixture().await;
        assert!(matches!(
            f.bridge.job_execution(JobExecutionId::new(42)).await,
            Err(OrchestrationError::UnknownJobExecution(_))
        ));
        assert!(matches!(
            f.bridge.job_instance(JobInstanceId::new(42)).await,
            Err(OrchestrationError::UnknownJobInstance(_))
        ));
        let instance = f.batch.create_instance("ingest").await;
        let job = f
            .batch
            .record_execution(instance, JobStatus::Started, at(0), BTreeMap::new())
            .await
            .unwrap();
        assert!(matches!(
            f.bridge.correlate(ExecutionId::new(42), job).await,
            Err(OrchestrationError::UnknownExecution(_))
        ));
    }

    #[tokio::test]
    async fn detail_includes_steps() {
        let f = fixture().await;
        let instance = f.batch.create_instance("ingest").await;
        let job = f
            .batch
            .record_execution(instance, JobStatus::Completed, at(0), BTreeMap::new())
            .await
            .unwrap();
        f.batch.record_step(job, "read", JobStatus::Completed, 5, 5).await.unwrap();

        let detail = f.bridge.job_execution(job).await.unwrap();
        assert_eq!(detail.steps.len(), 1);
        assert_eq!(detail.steps[0].step_name, "read");

        let view = f.bridge.job_instance(instance).await.unwrap();
        assert_eq!(view.executions.len(), 1);
    }
}
