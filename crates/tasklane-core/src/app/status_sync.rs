//! StatusSynchronizer - RUNNING → 終端状態の反映
//!
//! 終端遷移の書き手はここだけです。情報源は 2 つ：
//! - launcher への status 問い合わせ（`sync_once`、周期実行は `spawn`）
//! - 起動したタスク自身からの終了報告（`report_exit`）
//!
//! どちらが先に届いても、後から来た方は遷移エラーとして無視されます。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::background::{LoopHandle, spawn_periodic};
use super::registry::PlatformRegistry;
use super::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{
    ExecutionId, ExecutionStatus, FailureReason, OrchestrationError, TaskDeployment, TaskExecution,
};
use crate::ports::{ExecutionStore, RunStatus, StorageError};

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub checked: usize,
    pub completed: Vec<ExecutionId>,
    pub failed: Vec<ExecutionId>,
    pub still_running: usize,
    /// Executions whose status could not be determined this pass.
    pub errors: Vec<(ExecutionId, String)>,
}

pub struct StatusSynchronizer {
    registry: Arc<PlatformRegistry>,
    store: Arc<dyn ExecutionStore>,
    store_timeout: Duration,
}

impl StatusSynchronizer {
    pub fn new(registry: Arc<PlatformRegistry>, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            registry,
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Asks each launcher about its RUNNING executions once.
    pub async fn sync_once(&self) -> Result<SyncReport, OrchestrationError> {
        let running = bounded(self.store_timeout, self.store.running_deployments()).await?;
        let mut report = SyncReport {
            checked: running.len(),
            ..SyncReport::default()
        };

        for (execution, deployment) in running {
            let id = execution.execution_id;
            let status = match self.query(&deployment).await {
                Ok(status) => status,
                Err(reason) => {
                    tracing::warn!(execution_id = %id, launcher = %deployment.launcher_name, error = %reason, "status lookup failed");
                    report.errors.push((id, reason));
                    continue;
                }
            };

            match self.apply(&execution, status).await {
                Ok(Some(updated)) if updated.status == ExecutionStatus::Completed => report.completed.push(id),
                Ok(Some(_)) => report.failed.push(id),
                Ok(None) => report.still_running += 1,
                Err(StorageError::InvalidTransition(t)) => {
                    // an exit report got there first
                    tracing::debug!(execution_id = %id, from = %t.from, "already finished");
                }
                Err(e) => report.errors.push((id, e.to_string())),
            }
        }

        if !report.completed.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                checked = report.checked,
                completed = report.completed.len(),
                failed = report.failed.len(),
                "status sync pass"
            );
        }
        Ok(report)
    }

    async fn query(&self, deployment: &TaskDeployment) -> Result<RunStatus, String> {
        let resolved = self
            .registry
            .find_launcher(&deployment.launcher_name)
            .ok_or_else(|| format!("launcher '{}' is not registered", deployment.launcher_name))?;
        let launcher = resolved.launcher;
        match tokio::time::timeout(
            launcher.launch_timeout,
            launcher.backend.status(&deployment.external_run_id),
        )
        .await
        {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no answer within {:?}", launcher.launch_timeout)),
        }
    }

    /// `Ok(None)` while the run is still going.
    async fn apply(
        &self,
        execution: &TaskExecution,
        status: RunStatus,
    ) -> Result<Option<TaskExecution>, StorageError> {
        let id = execution.execution_id;
        let updated = match status {
            RunStatus::Launching | RunStatus::Running => return Ok(None),
            RunStatus::Complete { exit_code } => {
                bounded(self.store_timeout, self.store.complete_execution(id, exit_code, None)).await?
            }
            RunStatus::Failed {
                exit_code: Some(code),
                message,
            } => {
                bounded(self.store_timeout, self.store.complete_execution(id, code, Some(message))).await?
            }
            RunStatus::Failed {
                exit_code: None,
                message,
            } => self.fail(id, message).await?,
            RunStatus::Cancelled => self.fail(id, "cancelled on platform".to_string()).await?,
            RunStatus::Unknown => self.fail(id, "run no longer known to launcher".to_string()).await?,
        };
        tracing::debug!(execution_id = %id, status = %updated.status, "terminal state recorded");
        Ok(Some(updated))
    }

    async fn fail(&self, id: ExecutionId, message: String) -> Result<TaskExecution, StorageError> {
        bounded(
            self.store_timeout,
            self.store.fail_execution(id, FailureReason::TaskFailed(message)),
        )
        .await
    }

    /// Exit report sent by the launched task itself.
    pub async fn report_exit(
        &self,
        id: ExecutionId,
        exit_code: i32,
        exit_message: Option<String>,
    ) -> Result<TaskExecution, OrchestrationError> {
        let updated = bounded(
            self.store_timeout,
            self.store.complete_execution(id, exit_code, exit_message),
        )
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => OrchestrationError::UnknownExecution(id),
            other => other.into(),
        })?;
        tracing::info!(execution_id = %id, exit_code, status = %updated.status, "exit reported");
        Ok(updated)
    }

    /// Runs [`sync_once`](Self::sync_once) every `interval` in the background.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> LoopHandle {
        spawn_periodic("status-sync", interval, move || {
            let sync = self.clone();
            async move {
                if let Err(e) = sync.sync_once().await {
                    tracing::warn!(error = %e, "status sync pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Launcher, NewExecution, ResolvedProperties, TaskPlatform};
    use crate::impls::{InMemoryExecutionStore, ScriptedLauncher};
    use crate::ports::{FixedClock, LauncherBackend, NewDeployment};
    use crate::domain::{AppResource, LaunchRequest};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    struct Fixture {
        sync: Arc<StatusSynchronizer>,
        launcher: Arc<ScriptedLauncher>,
        store: Arc<InMemoryExecutionStore>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let launcher = Arc::new(ScriptedLauncher::new());
        let registry = PlatformRegistry::builder()
            .platform(TaskPlatform::new("local", vec![Launcher::new("local1", "local", launcher.clone())]).primary())
            .build()
            .unwrap();
        let store = Arc::new(InMemoryExecutionStore::new(clock));
        Fixture {
            sync: Arc::new(StatusSynchronizer::new(Arc::new(registry), store.clone())),
            launcher,
            store,
        }
    }

    /// Launch through the scripted backend and record the deployment.
    async fn running(f: &Fixture) -> (ExecutionId, String) {
        let id = f
            .store
            .create_execution(NewExecution {
                task_name: "etl".into(),
                arguments: vec![],
                properties: ResolvedProperties::default(),
                launcher_name: "local1".into(),
                parent_execution_id: None,
            })
            .await
            .unwrap()
            .execution_id;
        f.store.begin_launch(id).await.unwrap();
        let run_id = f
            .launcher
            .launch(&LaunchRequest {
                task_name: "etl".into(),
                resource: AppResource::new("file:/bin/true"),
                app_properties: BTreeMap::new(),
                deployment_properties: BTreeMap::new(),
                command_line_args: vec![],
                execution_id: Some(id),
            })
            .await
            .unwrap();
        f.store
            .record_launch(
                id,
                NewDeployment {
                    launcher_name: "local1".into(),
                    platform_name: "local".into(),
                    external_run_id: run_id.clone(),
                },
            )
            .await
            .unwrap();
        (id, run_id)
    }

    #[tokio::test]
    async fn finished_runs_become_terminal() {
        let f = fixture();
        let (ok, ok_run) = running(&f).await;
        let (bad, bad_run) = running(&f).await;
        let (busy, _) = running(&f).await;
        f.launcher.set_run_status(&ok_run, RunStatus::Complete { exit_code: 0 }).await;
        f.launcher
            .set_run_status(&bad_run, RunStatus::Failed { exit_code: Some(2), message: "boom".into() })
            .await;

        let report = f.sync.sync_once().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.completed, vec![ok]);
        assert_eq!(report.failed, vec![bad]);
        assert_eq!(report.still_running, 1);

        let failed = f.store.get_execution(bad).await.unwrap().unwrap();
        assert_eq!(failed.exit_code, Some(2));
        assert_eq!(failed.failure_reason, Some(FailureReason::TaskFailed("boom".into())));
        assert_eq!(
            f.store.get_execution(busy).await.unwrap().unwrap().status,
            ExecutionStatus::Running
        );
    }

    #[tokio::test]
    async fn cancelled_run_fails_the_execution() {
        let f = fixture();
        let (id, run) = running(&f).await;
        f.launcher.cancel(&run).await.unwrap();

        let report = f.sync.sync_once().await.unwrap();
        assert_eq!(report.failed, vec![id]);
    }

    #[tokio::test]
    async fn exit_report_wins_over_later_poll() {
        let f = fixture();
        let (id, run) = running(&f).await;

        let updated = f.sync.report_exit(id, 0, Some("done".into())).await.unwrap();
        assert_eq!(updated.status, ExecutionStatus::Completed);

        f.launcher.set_run_status(&run, RunStatus::Failed { exit_code: Some(1), message: "x".into() }).await;
        let report = f.sync.sync_once().await.unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(
            f.store.get_execution(id).await.unwrap().unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn exit_report_for_unknown_execution() {
        let f = fixture();
        assert!(matches!(
            f.sync.report_exit(ExecutionId::new(5), 0, None).await,
            Err(OrchestrationError::UnknownExecution(_))
        ));
    }

    #[tokio::test]
    async fn background_loop_picks_up_completion() {
        let f = fixture();
        let (id, run) = running(&f).await;
        let handle = f.sync.clone().spawn(Duration::from_millis(5));

        f.launcher.set_run_status(&run, RunStatus::Complete { exit_code: 0 }).await;
        for _ in 0..200 {
            if f.store.get_execution(id).await.unwrap().unwrap().status == ExecutionStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;
        assert_eq!(
            f.store.get_execution(id).await.unwrap().unwrap().status,
            ExecutionStatus::Completed
        );
    }
}
