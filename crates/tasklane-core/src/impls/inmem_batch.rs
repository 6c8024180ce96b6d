//! In-memory batch engine.
//!
//! Stands in for the external batch repository: job instances, job
//! executions and step executions, with the engine-side restart/stop/delete.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    JobExecution, JobExecutionFilter, JobExecutionId, JobInstance, JobInstanceId, JobStatus,
    StepExecution, StepExecutionId,
};
use crate::ports::{BatchEngine, BatchError, Clock};

struct BatchState {
    instances: BTreeMap<JobInstanceId, JobInstance>,
    executions: BTreeMap<JobExecutionId, JobExecution>,
    steps: HashMap<JobExecutionId, Vec<StepExecution>>,
    next_instance_id: u64,
    next_execution_id: u64,
    next_step_id: u64,
}

impl BatchState {
    fn insert_execution(
        &mut self,
        instance_id: JobInstanceId,
        job_name: String,
        status: JobStatus,
        start_time: Option<DateTime<Utc>>,
        parameters: BTreeMap<String, String>,
    ) -> JobExecutionId {
        let id = JobExecutionId::new(self.next_execution_id);
        self.next_execution_id += 1;
        self.executions.insert(
            id,
            JobExecution {
                id,
                instance_id,
                job_name,
                status,
                start_time,
                end_time: None,
                exit_description: None,
                parameters,
            },
        );
        id
    }
}

pub struct InMemoryBatchEngine {
    state: Mutex<BatchState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBatchEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BatchState {
                instances: BTreeMap::new(),
                executions: BTreeMap::new(),
                steps: HashMap::new(),
                next_instance_id: 1,
                next_execution_id: 1,
                next_step_id: 1,
            }),
            clock,
        }
    }

    pub async fn create_instance(&self, job_name: impl Into<String>) -> JobInstanceId {
        let mut state = self.state.lock().await;
        let id = JobInstanceId::new(state.next_instance_id);
        state.next_instance_id += 1;
        state.instances.insert(
            id,
            JobInstance {
                id,
                job_name: job_name.into(),
            },
        );
        id
    }

    /// Records a job execution as the engine would when a task's job starts.
    pub async fn record_execution(
        &self,
        instance_id: JobInstanceId,
        status: JobStatus,
        start_time: Option<DateTime<Utc>>,
        parameters: BTreeMap<String, String>,
    ) -> Result<JobExecutionId, BatchError> {
        let mut state = self.state.lock().await;
        let job_name = state
            .instances
            .get(&instance_id)
            .map(|i| i.job_name.clone())
            .ok_or_else(|| BatchError::Rejected(format!("unknown job instance {instance_id}")))?;
        Ok(state.insert_execution(instance_id, job_name, status, start_time, parameters))
    }

    pub async fn record_step(
        &self,
        job_execution_id: JobExecutionId,
        step_name: impl Into<String>,
        status: JobStatus,
        read_count: u64,
        write_count: u64,
    ) -> Result<StepExecutionId, BatchError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !state.executions.contains_key(&job_execution_id) {
            return Err(BatchError::NotFound(job_execution_id));
        }
        let id = StepExecutionId::new(state.next_step_id);
        state.next_step_id += 1;
        state.steps.entry(job_execution_id).or_default().push(StepExecution {
            id,
            job_execution_id,
            step_name: step_name.into(),
            status,
            read_count,
            write_count,
            start_time: Some(now),
            end_time: (!status.is_running()).then_some(now),
        });
        Ok(id)
    }

    pub async fn set_status(&self, id: JobExecutionId, status: JobStatus) -> Result<(), BatchError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let execution = state.executions.get_mut(&id).ok_or(BatchError::NotFound(id))?;
        execution.status = status;
        if !status.is_running() {
            execution.end_time = Some(now);
        }
        Ok(())
    }
}

#[async_trait]
impl BatchEngine for InMemoryBatchEngine {
    async fn list_job_executions(
        &self,
        filter: &JobExecutionFilter,
    ) -> Result<Vec<JobExecution>, BatchError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.state.lock().await.executions.get(&id).cloned())
    }

    async fn step_executions(&self, id: JobExecutionId) -> Result<Vec<StepExecution>, BatchError> {
        let state = self.state.lock().await;
        if !state.executions.contains_key(&id) {
            return Err(BatchError::NotFound(id));
        }
        Ok(state.steps.get(&id).cloned().unwrap_or_default())
    }

    async fn job_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, BatchError> {
        Ok(self.state.lock().await.instances.get(&id).cloned())
    }

    async fn job_executions_for_instance(
        &self,
        id: JobInstanceId,
    ) -> Result<Vec<JobExecution>, BatchError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .filter(|e| e.instance_id == id)
            .cloned()
            .collect())
    }

    async fn restart_job_execution(&self, id: JobExecutionId) -> Result<JobExecutionId, BatchError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let original = state.executions.get(&id).cloned().ok_or(BatchError::NotFound(id))?;
        if !original.status.is_restartable() {
            return Err(BatchError::Rejected(format!(
                "{id} is {} and cannot be restarted",
                original.status
            )));
        }
        Ok(state.insert_execution(
            original.instance_id,
            original.job_name,
            JobStatus::Starting,
            Some(now),
            original.parameters,
        ))
    }

    async fn stop_job_execution(&self, id: JobExecutionId) -> Result<(), BatchError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let execution = state.executions.get_mut(&id).ok_or(BatchError::NotFound(id))?;
        if !execution.status.is_running() {
            return Err(BatchError::Rejected(format!("{id} is {}", execution.status)));
        }
        execution.status = JobStatus::Stopped;
        execution.end_time = Some(now);
        Ok(())
    }

    async fn delete_job_execution(&self, id: JobExecutionId) -> Result<(), BatchError> {
        let mut state = self.state.lock().await;
        state.executions.remove(&id).ok_or(BatchError::NotFound(id))?;
        state.steps.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn engine() -> InMemoryBatchEngine {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        InMemoryBatchEngine::new(Arc::new(clock))
    }

    #[tokio::test]
    async fn restart_creates_new_execution_of_same_instance() {
        let engine = engine();
        let instance = engine.create_instance("ingest").await;
        let failed = engine
            .record_execution(instance, JobStatus::Failed, None, BTreeMap::new())
            .await
            .unwrap();

        let restarted = engine.restart_job_execution(failed).await.unwrap();
        assert_ne!(restarted, failed);

        let executions = engine.job_executions_for_instance(instance).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[1].status, JobStatus::Starting);
    }

    #[tokio::test]
    async fn completed_job_cannot_be_restarted() {
        let engine = engine();
        let instance = engine.create_instance("ingest").await;
        let done = engine
            .record_execution(instance, JobStatus::Completed, None, BTreeMap::new())
            .await
            .unwrap();
        let err = engine.restart_job_execution(done).await.unwrap_err();
        assert!(matches!(err, BatchError::Rejected(_)));
    }

    #[tokio::test]
    async fn delete_drops_steps_too() {
        let engine = engine();
        let instance = engine.create_instance("ingest").await;
        let id = engine
            .record_execution(instance, JobStatus::Started, None, BTreeMap::new())
            .await
            .unwrap();
        engine.record_step(id, "read", JobStatus::Completed, 10, 10).await.unwrap();

        engine.delete_job_execution(id).await.unwrap();
        assert!(engine.job_execution(id).await.unwrap().is_none());
        assert!(matches!(
            engine.step_executions(id).await,
            Err(BatchError::NotFound(_))
        ));
    }
}
