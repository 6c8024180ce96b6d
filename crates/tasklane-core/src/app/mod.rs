//! App - アプリケーション層
//!
//! ports を組み合わせてオーケストレーションのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **PlatformRegistry**: launcher の登録と選択（起動時に構築、以後不変）
//! - **DeploymentRequestBuilder**: プロパティのマージと LaunchRequest の組み立て
//! - **TaskExecutionOrchestrator**: launch / relaunch / cancel
//! - **JobBridge**: タスク実行とバッチジョブ実行の対応付け、restart / stop
//! - **DeletionCoordinator**: 実行レコードのカスケード削除
//! - **StatusSynchronizer**: RUNNING → 終端状態の反映
//! - **PendingReaper**: 取り残された PENDING / LAUNCHING 行の回収
//! - **DefinitionService**: タスク定義の作成・削除
//!
//! ストアへの呼び出しはすべて [`bounded`] で時間制限を付けます。

pub mod audit;
pub mod background;
pub mod definitions;
pub mod deletion;
pub mod job_bridge;
pub mod orchestrator;
pub mod reaper;
pub mod registry;
pub mod request_builder;
pub mod status_sync;
pub mod validation;

use std::future::Future;
use std::time::Duration;

use crate::ports::StorageError;

pub use self::audit::Auditor;
pub use self::background::LoopHandle;
pub use self::definitions::DefinitionService;
pub use self::deletion::{DeleteOptions, DeletionCoordinator, DeletionReport, DeletionTarget};
pub use self::job_bridge::{JobBridge, RestartOutcome};
pub use self::orchestrator::{CancelResult, LaunchCommand, TaskExecutionOrchestrator};
pub use self::reaper::{PendingReaper, ReapReport};
pub use self::registry::{PlatformRegistry, PlatformRegistryBuilder, ResolvedLauncher};
pub use self::request_builder::{DeploymentRequestBuilder, parse_properties};
pub use self::status_sync::{StatusSynchronizer, SyncReport};
pub use self::validation::{TaskValidator, ValidationReport};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a store call with a deadline; expiry is a `StorageError::Timeout`.
pub(crate) async fn bounded<T, E>(
    timeout: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<StorageError>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(timeout).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_becomes_storage_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout(_)));
    }
}
