//! Domain model (ids, states, records, requests, errors).

pub mod audit;
pub mod definition;
pub mod errors;
pub mod execution;
pub mod ids;
pub mod job;
pub mod launch;
pub mod page;
pub mod platform;
pub mod state;

pub use audit::{AuditAction, AuditOutcome, AuditRecord};
pub use definition::TaskDefinition;
pub use errors::{ErrorKind, OrchestrationError};
pub use execution::{
    ExecutionView, NewExecution, ResolvedProperties, TaskDeployment, TaskExecution,
    TransitionError,
};
pub use ids::{AuditId, ExecutionId, JobExecutionId, JobInstanceId, StepExecutionId};
pub use job::{
    JobExecution, JobExecutionDetail, JobExecutionFilter, JobExecutionView, JobInstance,
    JobInstanceView, StepExecution,
};
pub use launch::{AppResource, CallerContext, LaunchRequest};
pub use page::{Page, Pageable};
pub use platform::{DEFAULT_LAUNCH_TIMEOUT, Launcher, PlatformSummary, TaskPlatform};
pub use state::{ExecutionStatus, FailureReason, JobStatus};
