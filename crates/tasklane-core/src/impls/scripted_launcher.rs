//! ScriptedLauncher - 振る舞いを外から指定できる launcher（テスト・デモ用）
//!
//! - `accept` / `reject` / `hang` で次の launch の応答を切り替える
//! - `hold_launches` で launch 呼び出しを止め、`release_launches` で再開する
//!   （launcher 呼び出し中に cancel が来るケースの再現用）
//! - 受け取った LaunchRequest と cancel 対象の run id を記録する

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use crate::domain::LaunchRequest;
use crate::ports::{LauncherBackend, LauncherError, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchBehavior {
    Accept,
    /// Accept with this exact run id.
    AcceptAs(String),
    Reject(String),
    Transport(String),
    /// Never answers; the caller's timeout decides.
    Hang,
}

struct ScriptState {
    behavior: LaunchBehavior,
    requests: Vec<LaunchRequest>,
    statuses: HashMap<String, RunStatus>,
    cancelled: Vec<String>,
}

pub struct ScriptedLauncher {
    state: Mutex<ScriptState>,
    gate: watch::Sender<bool>,
    next_run: AtomicU64,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(ScriptState {
                behavior: LaunchBehavior::Accept,
                requests: Vec::new(),
                statuses: HashMap::new(),
                cancelled: Vec::new(),
            }),
            gate,
            next_run: AtomicU64::new(1),
        }
    }

    pub async fn set_behavior(&self, behavior: LaunchBehavior) {
        self.state.lock().await.behavior = behavior;
    }

    pub async fn set_run_status(&self, run_id: &str, status: RunStatus) {
        self.state
            .lock()
            .await
            .statuses
            .insert(run_id.to_string(), status);
    }

    /// Launch calls block until [`release_launches`](Self::release_launches).
    pub fn hold_launches(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_launches(&self) {
        self.gate.send_replace(true);
    }

    pub async fn requests(&self) -> Vec<LaunchRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn launch_count(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    pub async fn cancelled(&self) -> Vec<String> {
        self.state.lock().await.cancelled.clone()
    }
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LauncherBackend for ScriptedLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<String, LauncherError> {
        let behavior = {
            let mut state = self.state.lock().await;
            state.requests.push(request.clone());
            state.behavior.clone()
        };

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.map(|_| ());
        if opened.is_err() {
            return Err(LauncherError::Transport("launcher shut down".into()));
        }

        let run_id = match behavior {
            LaunchBehavior::Accept => format!("run-{}", self.next_run.fetch_add(1, Ordering::Relaxed)),
            LaunchBehavior::AcceptAs(run_id) => run_id,
            LaunchBehavior::Reject(reason) => return Err(LauncherError::Rejected(reason)),
            LaunchBehavior::Transport(reason) => return Err(LauncherError::Transport(reason)),
            LaunchBehavior::Hang => std::future::pending().await,
        };
        self.state
            .lock()
            .await
            .statuses
            .insert(run_id.clone(), RunStatus::Running);
        Ok(run_id)
    }

    async fn status(&self, external_run_id: &str) -> Result<RunStatus, LauncherError> {
        Ok(self
            .state
            .lock()
            .await
            .statuses
            .get(external_run_id)
            .cloned()
            .unwrap_or(RunStatus::Unknown))
    }

    async fn cancel(&self, external_run_id: &str) -> Result<(), LauncherError> {
        let mut state = self.state.lock().await;
        if !state.statuses.contains_key(external_run_id) {
            return Err(LauncherError::UnknownRun(external_run_id.to_string()));
        }
        state.cancelled.push(external_run_id.to_string());
        state
            .statuses
            .insert(external_run_id.to_string(), RunStatus::Cancelled);
        Ok(())
    }
}
