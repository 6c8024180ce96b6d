//! LocalLauncher - ローカルプロセスとしてタスクを起動する launcher
//!
//! # 起動時の引数
//! 1. LaunchRequest の command line args（`--task.execution-id=N` を含む）
//! 2. app properties を `--key=value` として後ろに付ける
//!
//! # deployment properties
//! - `working-dir`: 作業ディレクトリ
//! - `env.<NAME>`: 環境変数
//!
//! 子プロセスは run id ごとに保持し、状態は `try_wait` で都度確認します。
//! 終了した run の状態は直近 [`FINISHED_RETAINED`] 件だけ覚えておき、
//! それより古いものは `Unknown` になります。

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::domain::LaunchRequest;
use crate::ports::{LauncherBackend, LauncherError, RunStatus};

pub const PLATFORM_TYPE: &str = "local";

const WORKING_DIR_PROPERTY: &str = "working-dir";
const ENV_PREFIX: &str = "env.";

/// Finished runs whose status is still answered.
pub const FINISHED_RETAINED: usize = 256;

#[derive(Default)]
struct RunTable {
    slots: HashMap<String, RunSlot>,
    /// Finished run ids, oldest first.
    finished: VecDeque<String>,
    retained: usize,
}

impl RunTable {
    fn finish(&mut self, run_id: &str, status: RunStatus) {
        self.slots.insert(run_id.to_string(), RunSlot::Finished(status));
        self.finished.push_back(run_id.to_string());
        while self.finished.len() > self.retained {
            if let Some(oldest) = self.finished.pop_front() {
                self.slots.remove(&oldest);
            }
        }
    }
}

enum RunSlot {
    Live(Child),
    Finished(RunStatus),
}

pub struct LocalLauncher {
    runs: Mutex<RunTable>,
    next_run: AtomicU64,
    working_dir: Option<PathBuf>,
}

impl LocalLauncher {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(RunTable {
                retained: FINISHED_RETAINED,
                ..RunTable::default()
            }),
            next_run: AtomicU64::new(1),
            working_dir: None,
        }
    }

    pub fn with_finished_retained(mut self, retained: usize) -> Self {
        self.runs.get_mut().retained = retained;
        self
    }

    /// Default working directory; `working-dir` on a request overrides it.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command_for(&self, request: &LaunchRequest) -> Result<Command, LauncherError> {
        let program = request.resource.local_path().ok_or_else(|| {
            LauncherError::Rejected(format!(
                "resource '{}' is not a local executable",
                request.resource.uri
            ))
        })?;

        let mut cmd = Command::new(program);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.args(&request.command_line_args);
        for (key, value) in &request.app_properties {
            cmd.arg(format!("--{key}={value}"));
        }

        for (key, value) in &request.deployment_properties {
            if key == WORKING_DIR_PROPERTY {
                cmd.current_dir(value);
            } else if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                cmd.env(name, value);
            }
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

fn finished_status(status: ExitStatus) -> RunStatus {
    match status.code() {
        Some(0) => RunStatus::Complete { exit_code: 0 },
        Some(code) => RunStatus::Failed {
            exit_code: Some(code),
            message: format!("exited with code {code}"),
        },
        None => RunStatus::Failed {
            exit_code: None,
            message: "terminated by signal".to_string(),
        },
    }
}

#[async_trait]
impl LauncherBackend for LocalLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<String, LauncherError> {
        let mut cmd = self.command_for(request)?;
        let child = cmd.spawn().map_err(|e| {
            LauncherError::Rejected(format!("failed to spawn '{}': {e}", request.resource.uri))
        })?;

        let run_id = format!("local-{}", self.next_run.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(run_id = %run_id, task = %request.task_name, pid = ?child.id(), "spawned local task");
        self.runs
            .lock()
            .await
            .slots
            .insert(run_id.clone(), RunSlot::Live(child));
        Ok(run_id)
    }

    async fn status(&self, external_run_id: &str) -> Result<RunStatus, LauncherError> {
        let mut runs = self.runs.lock().await;
        let status = match runs.slots.get_mut(external_run_id) {
            None => return Ok(RunStatus::Unknown),
            Some(RunSlot::Finished(status)) => return Ok(status.clone()),
            Some(RunSlot::Live(child)) => match child.try_wait() {
                Ok(Some(exit)) => finished_status(exit),
                Ok(None) => return Ok(RunStatus::Running),
                Err(e) => return Err(LauncherError::Transport(e.to_string())),
            },
        };
        runs.finish(external_run_id, status.clone());
        Ok(status)
    }

    async fn cancel(&self, external_run_id: &str) -> Result<(), LauncherError> {
        let mut runs = self.runs.lock().await;
        let slot = runs
            .slots
            .get_mut(external_run_id)
            .ok_or_else(|| LauncherError::UnknownRun(external_run_id.to_string()))?;

        if let RunSlot::Live(child) = slot {
            child
                .kill()
                .await
                .map_err(|e| LauncherError::Transport(e.to_string()))?;
            runs.finish(external_run_id, RunStatus::Cancelled);
        }
        Ok(())
    }
}
