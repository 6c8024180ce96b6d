//! Batch job read models.
//!
//! These entities belong to the batch engine; this layer only reads them and
//! keeps the execution id <-> job execution id correlation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::execution::TaskExecution;
use super::ids::{JobExecutionId, JobInstanceId, StepExecutionId};
use super::state::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_name: String,
}

/// One run of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: JobExecutionId,
    pub instance_id: JobInstanceId,
    pub job_name: String,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_description: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Step-level progress recorded by the batch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub job_execution_id: JobExecutionId,
    pub step_name: String,
    pub status: JobStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Filters for job execution listings. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionFilter {
    pub job_name: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobExecutionFilter {
    pub fn matches(&self, execution: &JobExecution) -> bool {
        self.job_name
            .as_deref()
            .is_none_or(|name| name == execution.job_name)
            && self.status.is_none_or(|status| status == execution.status)
    }
}

/// A job execution joined with the task execution that produced it.
///
/// `task_execution` is `None` for job executions launched outside of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionView {
    pub job_execution: JobExecution,
    pub task_execution: Option<TaskExecution>,
}

/// Detail view: the join plus step executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionDetail {
    pub job_execution: JobExecution,
    pub task_execution: Option<TaskExecution>,
    pub steps: Vec<StepExecution>,
}

/// A job instance with all of its executions (oldest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstanceView {
    pub instance: JobInstance,
    pub executions: Vec<JobExecution>,
}

/// Ordering used by every job listing: start time ascending, unstarted
/// executions last, ties broken by id.
pub fn sort_by_start_time(executions: &mut [JobExecution]) {
    executions.sort_by(|a, b| match (a.start_time, b.start_time) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
}
