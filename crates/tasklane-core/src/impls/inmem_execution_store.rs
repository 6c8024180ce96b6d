//! In-memory execution record store.
//!
//! All rows live behind one tokio `Mutex`, so every operation below is a
//! single consistent unit: id allocation, execution + deployment writes, and
//! cascade removal never interleave.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ExecutionId, ExecutionStatus, ExecutionView, FailureReason, JobExecutionId, NewExecution,
    Page, Pageable, TaskDeployment, TaskExecution,
};
use crate::observability::ExecutionCounts;
use crate::ports::{
    CancelOutcome, Clock, DeletionBatch, ExecutionFilter, ExecutionStore, NewDeployment,
    RemovedExecution, StorageError,
};

struct InMemoryExecutionState {
    /// Execution rows (single source of truth). Ordered by id.
    executions: BTreeMap<ExecutionId, TaskExecution>,

    /// Deployment rows keyed by their execution.
    deployments: HashMap<ExecutionId, TaskDeployment>,

    /// execution -> job executions it produced.
    job_links: HashMap<ExecutionId, Vec<JobExecutionId>>,

    /// Reverse index: job execution -> execution.
    job_owner: HashMap<JobExecutionId, ExecutionId>,

    /// Next execution id to assign.
    next_execution_id: u64,
}

impl InMemoryExecutionState {
    fn new() -> Self {
        Self {
            executions: BTreeMap::new(),
            deployments: HashMap::new(),
            job_links: HashMap::new(),
            job_owner: HashMap::new(),
            next_execution_id: 1,
        }
    }

    fn allocate_execution_id(&mut self) -> ExecutionId {
        let id = ExecutionId::new(self.next_execution_id);
        self.next_execution_id += 1;
        id
    }

    fn execution_mut(&mut self, id: ExecutionId) -> Result<&mut TaskExecution, StorageError> {
        self.executions
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("execution: {id}")))
    }

    fn view(&self, id: ExecutionId) -> Option<ExecutionView> {
        let execution = self.executions.get(&id)?.clone();
        Some(ExecutionView {
            execution,
            deployment: self.deployments.get(&id).cloned(),
            job_execution_ids: self.job_links.get(&id).cloned().unwrap_or_default(),
        })
    }

    /// Removes one execution and everything hanging off it.
    fn remove(&mut self, id: ExecutionId, forced: bool) -> Option<RemovedExecution> {
        let execution = self.executions.remove(&id)?;
        let deployment = self.deployments.remove(&id);
        let job_execution_ids = self.job_links.remove(&id).unwrap_or_default();
        for job_id in &job_execution_ids {
            self.job_owner.remove(job_id);
        }
        Some(RemovedExecution {
            execution,
            deployment,
            job_execution_ids,
            forced,
        })
    }
}

/// Thread-safe in-memory [`ExecutionStore`]. Data is not persisted across restarts.
pub struct InMemoryExecutionStore {
    state: Mutex<InMemoryExecutionState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryExecutionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryExecutionState::new()),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of deployment rows.
    pub async fn deployment_count(&self) -> usize {
        self.state.lock().await.deployments.len()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, new: NewExecution) -> Result<TaskExecution, StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let id = state.allocate_execution_id();
        let execution = TaskExecution::pending(id, new, now);
        state.executions.insert(id, execution.clone());
        Ok(execution)
    }

    async fn begin_launch(&self, id: ExecutionId) -> Result<TaskExecution, StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        execution.begin_launch(now)?;
        Ok(execution.clone())
    }

    async fn record_launch(
        &self,
        id: ExecutionId,
        deployment: NewDeployment,
    ) -> Result<(TaskExecution, TaskDeployment), StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        if let Some(existing) = state.deployments.get(&id) {
            return Err(StorageError::Unavailable(format!(
                "{id} already has a deployment on '{}'",
                existing.launcher_name
            )));
        }

        let execution = state.execution_mut(id)?;
        if execution.status == ExecutionStatus::Launching {
            execution.mark_running(deployment.external_run_id.clone(), now)?;
        } else {
            // cancelled while the launcher call was in flight
            execution.attach_late_run_id(deployment.external_run_id.clone(), now);
        }
        let execution = execution.clone();

        let row = TaskDeployment {
            execution_id: id,
            task_name: execution.task_name.clone(),
            launcher_name: deployment.launcher_name,
            platform_name: deployment.platform_name,
            external_run_id: deployment.external_run_id,
            created_at: now,
        };
        state.deployments.insert(id, row.clone());
        Ok((execution, row))
    }

    async fn mark_launch_failed(
        &self,
        id: ExecutionId,
        reason: FailureReason,
    ) -> Result<TaskExecution, StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        execution.mark_launch_failed(reason, now)?;
        Ok(execution.clone())
    }

    async fn cancel_before_launch(&self, id: ExecutionId) -> Result<CancelOutcome, StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        if matches!(
            execution.status,
            ExecutionStatus::Pending | ExecutionStatus::Launching
        ) {
            execution.mark_failed(FailureReason::CancelledBeforeLaunch, now)?;
            return Ok(CancelOutcome::CancelledBeforeLaunch(execution.clone()));
        }
        let view = state
            .view(id)
            .ok_or_else(|| StorageError::NotFound(format!("execution: {id}")))?;
        Ok(CancelOutcome::Untouched(view))
    }

    async fn complete_execution(
        &self,
        id: ExecutionId,
        exit_code: i32,
        exit_message: Option<String>,
    ) -> Result<TaskExecution, StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        execution.complete(exit_code, exit_message, now)?;
        Ok(execution.clone())
    }

    async fn fail_execution(
        &self,
        id: ExecutionId,
        reason: FailureReason,
    ) -> Result<TaskExecution, StorageError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let execution = state.execution_mut(id)?;
        if execution.status == ExecutionStatus::Launching {
            execution.mark_launch_failed(reason, now)?;
        } else {
            execution.mark_failed(reason, now)?;
        }
        Ok(execution.clone())
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<TaskExecution>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.executions.get(&id).cloned())
    }

    async fn execution_view(&self, id: ExecutionId) -> Result<Option<ExecutionView>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.view(id))
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        pageable: Pageable,
    ) -> Result<Page<TaskExecution>, StorageError> {
        let state = self.state.lock().await;
        let matching: Vec<TaskExecution> = state
            .executions
            .values()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(Page::from_ordered(matching, pageable))
    }

    async fn execution_ids_for_task(&self, task_name: &str) -> Result<Vec<ExecutionId>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|e| e.task_name == task_name)
            .map(|e| e.execution_id)
            .collect())
    }

    async fn running_deployments(&self) -> Result<Vec<(TaskExecution, TaskDeployment)>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .filter_map(|e| {
                state
                    .deployments
                    .get(&e.execution_id)
                    .map(|d| (e.clone(), d.clone()))
            })
            .collect())
    }

    async fn stale_executions(
        &self,
        status: ExecutionStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<TaskExecution>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|e| e.status == status && e.updated_at < before)
            .cloned()
            .collect())
    }

    async fn link_job_execution(
        &self,
        id: ExecutionId,
        job_execution_id: JobExecutionId,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if !state.executions.contains_key(&id) {
            return Err(StorageError::NotFound(format!("execution: {id}")));
        }
        if let Some(owner) = state.job_owner.get(&job_execution_id)
            && *owner != id
        {
            return Err(StorageError::Unavailable(format!(
                "{job_execution_id} is already correlated with {owner}"
            )));
        }
        let links = state.job_links.entry(id).or_default();
        if !links.contains(&job_execution_id) {
            links.push(job_execution_id);
        }
        state.job_owner.insert(job_execution_id, id);
        Ok(())
    }

    async fn correlations_for_jobs(
        &self,
        job_execution_ids: &[JobExecutionId],
    ) -> Result<HashMap<JobExecutionId, TaskExecution>, StorageError> {
        let state = self.state.lock().await;
        Ok(job_execution_ids
            .iter()
            .filter_map(|job_id| {
                let owner = state.job_owner.get(job_id)?;
                let execution = state.executions.get(owner)?;
                Some((*job_id, execution.clone()))
            })
            .collect())
    }

    async fn delete_executions(
        &self,
        ids: &[ExecutionId],
        all_or_nothing: bool,
        force: bool,
    ) -> Result<DeletionBatch, StorageError> {
        let mut state = self.state.lock().await;
        let mut batch = DeletionBatch::default();
        if all_or_nothing && !force {
            batch.refused = ids
                .iter()
                .filter_map(|id| state.executions.get(id))
                .filter(|e| e.status.is_live())
                .map(|e| (e.execution_id, e.status))
                .collect();
            if !batch.refused.is_empty() {
                return Ok(batch);
            }
        }
        for &id in ids {
            let Some(status) = state.executions.get(&id).map(|e| e.status) else {
                continue;
            };
            let live = status.is_live();
            if live && !force {
                batch.refused.push((id, status));
                continue;
            }
            if let Some(removed) = state.remove(id, live) {
                batch.removed.push(removed);
            }
        }
        Ok(batch)
    }

    async fn counts_by_status(&self) -> Result<ExecutionCounts, StorageError> {
        let state = self.state.lock().await;
        let mut counts = ExecutionCounts::default();
        for execution in state.executions.values() {
            counts.record(execution.status);
        }
        Ok(counts)
    }
}
