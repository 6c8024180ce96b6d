//! Task execution and deployment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{ExecutionId, JobExecutionId};
use super::state::{ExecutionStatus, FailureReason};

/// Property snapshot taken when the launch request was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedProperties {
    pub app: BTreeMap<String, String>,
    pub deployment: BTreeMap<String, String>,
}

/// Illegal state change on an execution record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution {execution_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub execution_id: ExecutionId,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// One recorded launch attempt.
///
/// Design:
/// - State transitions go through methods so the legal-transition table in
///   [`ExecutionStatus::can_transition_to`] is the only gate.
/// - `external_run_id` is set exactly when the deployment record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub execution_id: ExecutionId,
    pub task_name: String,
    pub status: ExecutionStatus,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    pub exit_code: Option<i32>,
    pub exit_message: Option<String>,
    pub failure_reason: Option<FailureReason>,

    /// Set once the launcher accepted the request.
    pub external_run_id: Option<String>,

    /// Caller-supplied command-line arguments (without injected ones).
    pub arguments: Vec<String>,
    pub properties: ResolvedProperties,

    /// Launcher chosen for this execution.
    pub launcher_name: String,

    /// Execution this one was relaunched from, if any.
    pub parent_execution_id: Option<ExecutionId>,

    pub updated_at: DateTime<Utc>,
}

/// Everything needed to reserve a new execution row.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub task_name: String,
    pub arguments: Vec<String>,
    pub properties: ResolvedProperties,
    pub launcher_name: String,
    pub parent_execution_id: Option<ExecutionId>,
}

impl TaskExecution {
    pub fn pending(execution_id: ExecutionId, new: NewExecution, now: DateTime<Utc>) -> Self {
        Self {
            execution_id,
            task_name: new.task_name,
            status: ExecutionStatus::Pending,
            start_time: now,
            end_time: None,
            exit_code: None,
            exit_message: None,
            failure_reason: None,
            external_run_id: None,
            arguments: new.arguments,
            properties: new.properties,
            launcher_name: new.launcher_name,
            parent_execution_id: new.parent_execution_id,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: ExecutionStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                execution_id: self.execution_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// PENDING -> LAUNCHING.
    pub fn begin_launch(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Launching, now)
    }

    /// LAUNCHING -> RUNNING, recording the external run id.
    pub fn mark_running(&mut self, external_run_id: String, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Running, now)?;
        self.external_run_id = Some(external_run_id);
        Ok(())
    }

    /// LAUNCHING -> LAUNCH_FAILED.
    pub fn mark_launch_failed(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::LaunchFailed, now)?;
        self.failure_reason = Some(reason);
        self.end_time = Some(now);
        Ok(())
    }

    /// PENDING/LAUNCHING/RUNNING -> FAILED.
    pub fn mark_failed(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Failed, now)?;
        self.failure_reason = Some(reason);
        self.end_time = Some(now);
        Ok(())
    }

    /// RUNNING -> COMPLETED / FAILED depending on the exit code.
    pub fn complete(
        &mut self,
        exit_code: i32,
        exit_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if exit_code == 0 {
            self.transition(ExecutionStatus::Completed, now)?;
        } else {
            self.transition(ExecutionStatus::Failed, now)?;
            self.failure_reason = Some(FailureReason::TaskFailed(
                exit_message
                    .clone()
                    .unwrap_or_else(|| format!("exit code {exit_code}")),
            ));
        }
        self.exit_code = Some(exit_code);
        self.exit_message = exit_message;
        self.end_time = Some(now);
        Ok(())
    }

    /// Accepted after a cancel already failed the row: keep the status, but
    /// record the run id so the deployment invariant still holds.
    pub fn attach_late_run_id(&mut self, external_run_id: String, now: DateTime<Utc>) {
        self.external_run_id = Some(external_run_id);
        self.updated_at = now;
    }
}

/// Which launcher handled an execution. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDeployment {
    pub execution_id: ExecutionId,
    pub task_name: String,
    pub launcher_name: String,
    pub platform_name: String,
    pub external_run_id: String,
    pub created_at: DateTime<Utc>,
}

/// Execution, its deployment and its job correlations read in one go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionView {
    pub execution: TaskExecution,
    pub deployment: Option<TaskDeployment>,
    pub job_execution_ids: Vec<JobExecutionId>,
}
