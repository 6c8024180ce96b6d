//! PendingReaper - 取り残された PENDING / LAUNCHING 行の回収
//!
//! 行の作成と launcher 呼び出しの間でプロセスが落ちると、PENDING のまま
//! 誰も進めない行が残ります。LAUNCHING のまま止まった行も同様です。
//!
//! # フロー
//! 1. `updated_at` が閾値より古い PENDING 行 → FAILED（Orphaned）
//! 2. 同じく古い LAUNCHING 行 → LAUNCH_FAILED（Orphaned）
//!
//! 外部で実際に動いている run との突き合わせはここでは行いません。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::background::{LoopHandle, spawn_periodic};
use super::{DEFAULT_STORE_TIMEOUT, bounded};
use crate::domain::{ExecutionId, ExecutionStatus, FailureReason, OrchestrationError};
use crate::ports::{Clock, ExecutionStore, StorageError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    pub pending_failed: Vec<ExecutionId>,
    pub launching_failed: Vec<ExecutionId>,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.pending_failed.len() + self.launching_failed.len()
    }
}

pub struct PendingReaper {
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
    max_age: chrono::Duration,
    store_timeout: Duration,
}

impl PendingReaper {
    pub fn new(store: Arc<dyn ExecutionStore>, clock: Arc<dyn Clock>, max_age: chrono::Duration) -> Self {
        Self {
            store,
            clock,
            max_age,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub async fn reap_once(&self) -> Result<ReapReport, OrchestrationError> {
        let cutoff = self.clock.now() - self.max_age;
        let mut report = ReapReport::default();

        for status in [ExecutionStatus::Pending, ExecutionStatus::Launching] {
            let stale = bounded(self.store_timeout, self.store.stale_executions(status, cutoff)).await?;
            for execution in stale {
                let id = execution.execution_id;
                match bounded(
                    self.store_timeout,
                    self.store.fail_execution(id, FailureReason::Orphaned),
                )
                .await
                {
                    Ok(updated) => {
                        tracing::warn!(execution_id = %id, from = %status, to = %updated.status, "orphaned execution reaped");
                        match status {
                            ExecutionStatus::Pending => report.pending_failed.push(id),
                            _ => report.launching_failed.push(id),
                        }
                    }
                    // moved on since the scan
                    Err(StorageError::InvalidTransition(_)) | Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> LoopHandle {
        spawn_periodic("pending-reaper", interval, move || {
            let reaper = self.clone();
            async move {
                if let Err(e) = reaper.reap_once().await {
                    tracing::warn!(error = %e, "reaper pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewExecution, ResolvedProperties};
    use crate::impls::InMemoryExecutionStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn new_execution() -> NewExecution {
        NewExecution {
            task_name: "etl".into(),
            arguments: vec![],
            properties: ResolvedProperties::default(),
            launcher_name: "local1".into(),
            parent_execution_id: None,
        }
    }

    #[tokio::test]
    async fn only_old_rows_are_reaped() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryExecutionStore::new(clock.clone()));
        let reaper = PendingReaper::new(store.clone(), clock.clone(), chrono::Duration::minutes(10));

        let old_pending = store.create_execution(new_execution()).await.unwrap().execution_id;
        let old_launching = store.create_execution(new_execution()).await.unwrap().execution_id;
        store.begin_launch(old_launching).await.unwrap();

        clock.advance(chrono::Duration::minutes(15));
        let fresh = store.create_execution(new_execution()).await.unwrap().execution_id;

        let report = reaper.reap_once().await.unwrap();
        assert_eq!(report.pending_failed, vec![old_pending]);
        assert_eq!(report.launching_failed, vec![old_launching]);

        let pending = store.get_execution(old_pending).await.unwrap().unwrap();
        assert_eq!(pending.status, ExecutionStatus::Failed);
        assert_eq!(pending.failure_reason, Some(FailureReason::Orphaned));
        let launching = store.get_execution(old_launching).await.unwrap().unwrap();
        assert_eq!(launching.status, ExecutionStatus::LaunchFailed);
        assert_eq!(
            store.get_execution(fresh).await.unwrap().unwrap().status,
            ExecutionStatus::Pending
        );
    }

    #[tokio::test]
    async fn nothing_to_reap() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryExecutionStore::new(clock.clone()));
        let reaper = PendingReaper::new(store, clock, chrono::Duration::minutes(10));
        assert_eq!(reaper.reap_once().await.unwrap().total(), 0);
    }
}
