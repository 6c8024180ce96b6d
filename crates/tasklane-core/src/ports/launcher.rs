//! LauncherBackend port - 実行基盤ごとの起動・状態取得・停止
//!
//! 実行基盤（ローカルプロセス, Kubernetes, Cloud Foundry など）の
//! ワイヤプロトコルはここでは扱わず、一様な launcher capability として見ます。

use async_trait::async_trait;

use crate::domain::LaunchRequest;

/// What a backend knows about one external run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Accepted but not started yet.
    Launching,
    Running,
    Complete { exit_code: i32 },
    Failed { exit_code: Option<i32>, message: String },
    Cancelled,
    /// The backend has no record of the run.
    Unknown,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RunStatus::Complete { .. } | RunStatus::Failed { .. } | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    /// The backend refused the request (bad resource, quota, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend could not be reached or failed mid-call.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unknown run '{0}'")]
    UnknownRun(String),
}

#[async_trait]
pub trait LauncherBackend: Send + Sync {
    /// Start the task; returns the backend's run id.
    async fn launch(&self, request: &LaunchRequest) -> Result<String, LauncherError>;

    async fn status(&self, external_run_id: &str) -> Result<RunStatus, LauncherError>;

    async fn cancel(&self, external_run_id: &str) -> Result<(), LauncherError>;
}
