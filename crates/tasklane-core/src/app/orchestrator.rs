//! TaskExecutionOrchestrator - 起動経路の中心
//!
//! # フロー（launch）
//! 1. タスク定義の検証（UnknownTask / InvalidComposedTask）
//! 2. PlatformRegistry で launcher を選ぶ
//! 3. DeploymentRequestBuilder で LaunchRequest を組み立てる
//! 4. ExecutionStore に PENDING 行を作り、execution id を得る
//! 5. PENDING → LAUNCHING（cancel 済みならここで止まり launcher は呼ばない）
//! 6. launcher を launch timeout 付きで呼ぶ
//!    - 受理: run id と deployment を同じ単位で書き、RUNNING へ
//!    - 拒否・通信失敗・タイムアウト: LAUNCH_FAILED（行は残す）
//! 7. 結果に関わらず監査レコードを残す
//!
//! 1〜3 のエラーはレコードを作る前に返るので副作用がありません。
//! 終端遷移（RUNNING → COMPLETED/FAILED）は StatusSynchronizer の責務です。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::audit::Auditor;
use super::registry::{PlatformRegistry, ResolvedLauncher};
use super::request_builder::DeploymentRequestBuilder;
use super::validation::TaskValidator;
use super::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{
    AuditAction, AuditOutcome, CallerContext, ExecutionId, ExecutionStatus, ExecutionView,
    FailureReason, LaunchRequest, NewExecution, OrchestrationError, Page, Pageable,
    ResolvedProperties, TaskExecution,
};
use crate::observability::ExecutionCounts;
use crate::ports::{
    AppResolver, CancelOutcome, ExecutionFilter, ExecutionStore, NewDeployment, StorageError,
    TaskDefinitionStore,
};

/// What to launch and where.
#[derive(Debug, Clone, Default)]
pub struct LaunchCommand {
    pub task_name: String,
    pub deployment_properties: BTreeMap<String, String>,
    pub command_line_args: Vec<String>,
    /// Platform or launcher name; `None` picks the primary platform.
    pub platform_name: Option<String>,
    pub parent_execution_id: Option<ExecutionId>,
}

impl LaunchCommand {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Self::default()
        }
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.deployment_properties = properties;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.command_line_args = args;
        self
    }

    pub fn on_platform(mut self, platform_name: impl Into<String>) -> Self {
        self.platform_name = Some(platform_name.into());
        self
    }

    /// Re-runs `original` with its resolved property snapshot on the same launcher.
    ///
    /// Keys are re-scoped to the task (`app.<task>.<key>`) so the builder
    /// strips exactly that scope and nothing from the stored key.
    pub fn relaunch_of(original: &TaskExecution) -> Self {
        let task = &original.task_name;
        let mut properties = BTreeMap::new();
        for (key, value) in &original.properties.app {
            properties.insert(format!("app.{task}.{key}"), value.clone());
        }
        for (key, value) in &original.properties.deployment {
            properties.insert(format!("deployer.{task}.{key}"), value.clone());
        }
        Self {
            task_name: original.task_name.clone(),
            deployment_properties: properties,
            command_line_args: original.arguments.clone(),
            platform_name: Some(original.launcher_name.clone()),
            parent_execution_id: Some(original.execution_id),
        }
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelResult {
    /// Was PENDING/LAUNCHING; now FAILED and the launcher is never called.
    CancelledBeforeLaunch,
    /// RUNNING; the launcher was asked to stop the run. The terminal state
    /// arrives through status sync.
    CancelRequested { external_run_id: String },
}

pub struct TaskExecutionOrchestrator {
    registry: Arc<PlatformRegistry>,
    validator: TaskValidator,
    builder: DeploymentRequestBuilder,
    store: Arc<dyn ExecutionStore>,
    auditor: Auditor,
    store_timeout: Duration,
}

impl TaskExecutionOrchestrator {
    pub fn new(
        registry: Arc<PlatformRegistry>,
        definitions: Arc<dyn TaskDefinitionStore>,
        resolver: Arc<dyn AppResolver>,
        store: Arc<dyn ExecutionStore>,
        auditor: Auditor,
    ) -> Self {
        Self {
            registry,
            validator: TaskValidator::new(definitions, resolver.clone()),
            builder: DeploymentRequestBuilder::new(resolver),
            store,
            auditor,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_common_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.builder = self.builder.with_common_properties(properties);
        self
    }

    pub fn with_server_uri(mut self, uri: impl Into<String>) -> Self {
        self.builder = self.builder.with_server_uri(uri);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub async fn launch(
        &self,
        command: LaunchCommand,
        caller: &CallerContext,
    ) -> Result<ExecutionId, OrchestrationError> {
        let definition = bounded(
            self.store_timeout,
            self.validator.launchable_definition(&command.task_name),
        )
        .await?;
        let resolved = self.registry.resolve_launcher(command.platform_name.as_deref())?;
        let request = self
            .builder
            .build(
                &definition,
                &command.deployment_properties,
                &command.command_line_args,
                caller,
            )
            .await?;

        let new = NewExecution {
            task_name: command.task_name.clone(),
            arguments: request.command_line_args.clone(),
            properties: ResolvedProperties {
                app: request.app_properties.clone(),
                deployment: request.deployment_properties.clone(),
            },
            launcher_name: resolved.launcher.name.clone(),
            parent_execution_id: command.parent_execution_id,
        };
        let execution = match bounded(self.store_timeout, self.store.create_execution(new)).await {
            Ok(execution) => execution,
            Err(e) => {
                // fail closed: no durable row, no launcher call
                self.auditor
                    .record(
                        AuditAction::Launch,
                        &command.task_name,
                        caller,
                        AuditOutcome::Failure(e.to_string()),
                        json!({ "task": command.task_name, "launcher": resolved.launcher.name }),
                    )
                    .await;
                return Err(e.into());
            }
        };

        let id = execution.execution_id;
        let result = self.launch_reserved(id, &resolved, request).await;

        let outcome = match &result {
            Ok(()) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.auditor
            .record(
                AuditAction::Launch,
                id.to_string(),
                caller,
                outcome,
                json!({
                    "task": command.task_name,
                    "platform": resolved.platform_name,
                    "launcher": resolved.launcher.name,
                    "parent_execution_id": command.parent_execution_id.map(|p| p.value()),
                }),
            )
            .await;

        result.map(|()| id)
    }

    /// Steps 5-6 for a row that already exists in PENDING.
    async fn launch_reserved(
        &self,
        id: ExecutionId,
        resolved: &ResolvedLauncher,
        request: LaunchRequest,
    ) -> Result<(), OrchestrationError> {
        match bounded(self.store_timeout, self.store.begin_launch(id)).await {
            Ok(_) => {}
            Err(StorageError::InvalidTransition(_)) => {
                tracing::info!(execution_id = %id, "cancelled before launch; launcher not called");
                return Err(OrchestrationError::CancelledBeforeLaunch { execution_id: id });
            }
            Err(e) => return Err(e.into()),
        }

        let launcher = &resolved.launcher;
        let request = request.with_execution_id(id);
        tracing::debug!(execution_id = %id, launcher = %launcher.name, "invoking launcher");

        let answer = tokio::time::timeout(launcher.launch_timeout, launcher.backend.launch(&request)).await;
        let run_id = match answer {
            Ok(Ok(run_id)) => run_id,
            Ok(Err(e)) => {
                tracing::warn!(execution_id = %id, launcher = %launcher.name, error = %e, "launch rejected");
                self.record_launch_failure(id, FailureReason::LauncherRejected(e.to_string()))
                    .await?;
                return Err(OrchestrationError::LauncherRejected {
                    execution_id: id,
                    launcher: launcher.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    execution_id = %id,
                    launcher = %launcher.name,
                    timeout_ms = launcher.launch_timeout.as_millis() as u64,
                    "launch timed out; external run state unknown"
                );
                self.record_launch_failure(id, FailureReason::LaunchTimeout).await?;
                return Err(OrchestrationError::LaunchTimeout {
                    execution_id: id,
                    launcher: launcher.name.clone(),
                    timeout: launcher.launch_timeout,
                });
            }
        };

        let deployment = NewDeployment {
            launcher_name: launcher.name.clone(),
            platform_name: resolved.platform_name.clone(),
            external_run_id: run_id.clone(),
        };
        let (execution, _) = bounded(self.store_timeout, self.store.record_launch(id, deployment))
            .await
            .inspect_err(|e| {
                tracing::error!(
                    execution_id = %id,
                    run_id = %run_id,
                    error = %e,
                    "launcher accepted but the run could not be recorded"
                )
            })?;

        if execution.status != ExecutionStatus::Running {
            // cancelled while the launcher call was in flight
            tracing::info!(execution_id = %id, run_id = %run_id, "late acceptance of a cancelled execution; stopping run");
            if let Err(e) = launcher.backend.cancel(&run_id).await {
                tracing::warn!(execution_id = %id, run_id = %run_id, error = %e, "could not stop late run");
            }
            return Err(OrchestrationError::CancelledBeforeLaunch { execution_id: id });
        }

        tracing::info!(
            execution_id = %id,
            task = %execution.task_name,
            launcher = %launcher.name,
            run_id = %run_id,
            "task launched"
        );
        Ok(())
    }

    /// LAUNCHING -> LAUNCH_FAILED. A row already failed by a concurrent
    /// cancel stays as it is.
    async fn record_launch_failure(
        &self,
        id: ExecutionId,
        reason: FailureReason,
    ) -> Result<(), OrchestrationError> {
        match bounded(self.store_timeout, self.store.mark_launch_failed(id, reason)).await {
            Ok(_) => Ok(()),
            Err(StorageError::InvalidTransition(t)) => {
                tracing::debug!(execution_id = %id, from = %t.from, "launch failure after cancel");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Launches `original` again with its resolved properties, recording the
    /// lineage in `parent_execution_id`.
    pub async fn relaunch(
        &self,
        original: &TaskExecution,
        caller: &CallerContext,
    ) -> Result<ExecutionId, OrchestrationError> {
        self.launch(LaunchCommand::relaunch_of(original), caller).await
    }

    pub async fn cancel(
        &self,
        id: ExecutionId,
        caller: &CallerContext,
    ) -> Result<CancelResult, OrchestrationError> {
        let outcome = bounded(self.store_timeout, self.store.cancel_before_launch(id))
            .await
            .map_err(|e| not_found_as_unknown(e, id))?;

        let result = match outcome {
            CancelOutcome::CancelledBeforeLaunch(_) => {
                tracing::info!(execution_id = %id, "cancelled before launch");
                Ok(CancelResult::CancelledBeforeLaunch)
            }
            CancelOutcome::Untouched(view) => self.cancel_running(view).await,
        };

        let outcome = match &result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        let data = match &result {
            Ok(CancelResult::CancelRequested { external_run_id }) => json!({ "run_id": external_run_id }),
            _ => serde_json::Value::Null,
        };
        self.auditor
            .record(AuditAction::Cancel, id.to_string(), caller, outcome, data)
            .await;
        result
    }

    async fn cancel_running(&self, view: ExecutionView) -> Result<CancelResult, OrchestrationError> {
        let id = view.execution.execution_id;
        let status = view.execution.status;
        if status != ExecutionStatus::Running {
            return Err(OrchestrationError::NotCancellable {
                execution_id: id,
                status,
            });
        }

        let Some(deployment) = view.deployment else {
            return Err(OrchestrationError::CancelFailed {
                execution_id: id,
                reason: "no deployment recorded".into(),
            });
        };
        let resolved = self
            .registry
            .find_launcher(&deployment.launcher_name)
            .ok_or_else(|| OrchestrationError::CancelFailed {
                execution_id: id,
                reason: format!("launcher '{}' is not registered", deployment.launcher_name),
            })?;

        let launcher = resolved.launcher;
        let run_id = deployment.external_run_id;
        match tokio::time::timeout(launcher.launch_timeout, launcher.backend.cancel(&run_id)).await {
            Ok(Ok(())) => {
                tracing::info!(execution_id = %id, run_id = %run_id, launcher = %launcher.name, "cancel requested");
                Ok(CancelResult::CancelRequested {
                    external_run_id: run_id,
                })
            }
            Ok(Err(e)) => Err(OrchestrationError::CancelFailed {
                execution_id: id,
                reason: e.to_string(),
            }),
            Err(_) => Err(OrchestrationError::CancelFailed {
                execution_id: id,
                reason: format!("no answer within {:?}", launcher.launch_timeout),
            }),
        }
    }

    pub async fn execution(&self, id: ExecutionId) -> Result<ExecutionView, OrchestrationError> {
        bounded(self.store_timeout, self.store.execution_view(id))
            .await?
            .ok_or(OrchestrationError::UnknownExecution(id))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        pageable: Pageable,
    ) -> Result<Page<TaskExecution>, OrchestrationError> {
        Ok(bounded(self.store_timeout, self.store.list_executions(filter, pageable)).await?)
    }

    pub async fn counts(&self) -> Result<ExecutionCounts, OrchestrationError> {
        Ok(bounded(self.store_timeout, self.store.counts_by_status()).await?)
    }
}

fn not_found_as_unknown(error: StorageError, id: ExecutionId) -> OrchestrationError {
    match error {
        StorageError::NotFound(_) => OrchestrationError::UnknownExecution(id),
        other => other.into(),
    }
}
