//! DefinitionService - タスク定義の作成・削除
//!
//! - 同名の定義があれば作成は `DuplicateTask`
//! - RUNNING / LAUNCHING の実行が残っている定義は削除しない
//! - 実行レコード自体は削除しない（履歴として残す）

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::audit::Auditor;
use super::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{AuditAction, AuditOutcome, CallerContext, OrchestrationError, TaskDefinition};
use crate::ports::{ExecutionStore, TaskDefinitionStore};

pub struct DefinitionService {
    definitions: Arc<dyn TaskDefinitionStore>,
    store: Arc<dyn ExecutionStore>,
    auditor: Auditor,
    store_timeout: Duration,
}

impl DefinitionService {
    pub fn new(
        definitions: Arc<dyn TaskDefinitionStore>,
        store: Arc<dyn ExecutionStore>,
        auditor: Auditor,
    ) -> Self {
        Self {
            definitions,
            store,
            auditor,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub async fn create(
        &self,
        definition: TaskDefinition,
        caller: &CallerContext,
    ) -> Result<(), OrchestrationError> {
        let name = definition.name.clone();
        if bounded(self.store_timeout, self.definitions.exists(&name)).await? {
            return Err(OrchestrationError::DuplicateTask(name));
        }

        let data = json!({
            "app_reference": definition.app_reference,
            "composed_steps": definition.composed_steps,
        });
        let result = bounded(self.store_timeout, self.definitions.save(definition)).await;
        let outcome = match &result {
            Ok(()) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.auditor
            .record(AuditAction::CreateDefinition, name.as_str(), caller, outcome, data)
            .await;

        result?;
        tracing::info!(task = %name, actor = %caller.actor, "task definition created");
        Ok(())
    }

    pub async fn destroy(&self, name: &str, caller: &CallerContext) -> Result<(), OrchestrationError> {
        if !bounded(self.store_timeout, self.definitions.exists(name)).await? {
            return Err(OrchestrationError::UnknownTask(name.to_string()));
        }

        let ids = bounded(self.store_timeout, self.store.execution_ids_for_task(name)).await?;
        let mut live = Vec::new();
        for id in ids {
            if let Some(execution) = bounded(self.store_timeout, self.store.get_execution(id)).await?
                && execution.status.is_live()
            {
                live.push(id);
            }
        }
        if !live.is_empty() {
            self.auditor
                .record(
                    AuditAction::DestroyDefinition,
                    name,
                    caller,
                    AuditOutcome::Failure(format!("{} executions still running", live.len())),
                    json!({ "running": live.iter().map(|id| id.value()).collect::<Vec<_>>() }),
                )
                .await;
            return Err(OrchestrationError::ExecutionStillRunning(live));
        }

        let result = bounded(self.store_timeout, self.definitions.delete(name)).await;
        let outcome = match &result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        self.auditor
            .record(AuditAction::DestroyDefinition, name, caller, outcome, serde_json::Value::Null)
            .await;

        result?;
        tracing::info!(task = %name, actor = %caller.actor, "task definition destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewExecution, ResolvedProperties};
    use crate::impls::{InMemoryAuditSink, InMemoryDefinitionStore, InMemoryExecutionStore};
    use crate::ports::{FixedClock, NewDeployment, UlidGenerator};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        service: DefinitionService,
        definitions: Arc<InMemoryDefinitionStore>,
        store: Arc<InMemoryExecutionStore>,
        audit: Arc<InMemoryAuditSink>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let definitions = Arc::new(InMemoryDefinitionStore::with_definitions([TaskDefinition::new(
            "etl-daily",
            "etl",
        )]));
        let store = Arc::new(InMemoryExecutionStore::new(clock.clone()));
        let audit = Arc::new(InMemoryAuditSink::new());
        let auditor = Auditor::new(audit.clone(), Arc::new(UlidGenerator::new(clock.clone())), clock);
        Fixture {
            service: DefinitionService::new(definitions.clone(), store.clone(), auditor),
            definitions,
            store,
            audit,
        }
    }

    async fn running_execution(store: &InMemoryExecutionStore, task: &str) {
        let id = store
            .create_execution(NewExecution {
                task_name: task.into(),
                arguments: vec![],
                properties: ResolvedProperties::default(),
                launcher_name: "local1".into(),
                parent_execution_id: None,
            })
            .await
            .unwrap()
            .execution_id;
        store.begin_launch(id).await.unwrap();
        store
            .record_launch(
                id,
                NewDeployment {
                    launcher_name: "local1".into(),
                    platform_name: "local".into(),
                    external_run_id: "run-1".into(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_then_duplicate() {
        let f = fixture();
        let caller = CallerContext::new("alice");
        f.service
            .create(TaskDefinition::new("etl-weekly", "etl"), &caller)
            .await
            .unwrap();
        assert_eq!(f.definitions.names().await, vec!["etl-daily", "etl-weekly"]);

        let err = f
            .service
            .create(TaskDefinition::new("etl-weekly", "other"), &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::DuplicateTask(name) if name == "etl-weekly"));

        let records = f.audit.records_for(AuditAction::CreateDefinition).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "etl-weekly");
    }

    #[tokio::test]
    async fn destroy_unknown_task() {
        let f = fixture();
        let err = f.service.destroy("nope", &CallerContext::system()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownTask(_)));
        assert!(f.audit.records().await.is_empty());
    }

    #[tokio::test]
    async fn destroy_refused_while_running() {
        let f = fixture();
        running_execution(&f.store, "etl-daily").await;

        let err = f.service.destroy("etl-daily", &CallerContext::system()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ExecutionStillRunning(ids) if ids.len() == 1));
        assert_eq!(f.definitions.names().await, vec!["etl-daily"]);

        let records = f.audit.records_for(AuditAction::DestroyDefinition).await;
        assert!(matches!(records[0].outcome, AuditOutcome::Failure(_)));
    }

    #[tokio::test]
    async fn destroy_removes_definition() {
        let f = fixture();
        f.service.destroy("etl-daily", &CallerContext::new("bob")).await.unwrap();
        assert!(f.definitions.names().await.is_empty());

        let records = f.audit.records_for(AuditAction::DestroyDefinition).await;
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].actor, "bob");
    }
}
