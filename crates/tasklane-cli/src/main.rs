//! tasklane CLI
//!
//! 設定ファイル（TOML）からプラットフォームとタスク定義を読み込み、
//! ローカル launcher でタスクを起動します。レコードはプロセス内のメモリにのみ残ります。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tasklane_core::app::{
    Auditor, LaunchCommand, StatusSynchronizer, TaskExecutionOrchestrator, TaskValidator,
    parse_properties,
};
use tasklane_core::config::TaskLaneConfig;
use tasklane_core::domain::{CallerContext, ExecutionId, ExecutionView};
use tasklane_core::impls::{InMemoryAuditSink, InMemoryExecutionStore};
use tasklane_core::ports::{Clock, SystemClock, UlidGenerator};

#[derive(Debug, Parser)]
#[command(name = "tasklane")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file; without it a single local platform named "default" is used.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Actor recorded in audit records.
    #[arg(long, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured platforms and their launchers.
    Platforms,

    /// Check that a task definition can be launched.
    Validate { task: String },

    /// Launch a task.
    Launch {
        task: String,

        /// Platform or launcher name.
        #[arg(long, short = 'p')]
        platform: Option<String>,

        /// Launch properties, e.g. "app.batch=10,deployer.working-dir=/tmp".
        #[arg(long)]
        properties: Option<String>,

        /// Wait for the task to finish.
        #[arg(long, short = 'w')]
        wait: bool,

        #[arg(long, default_value = "500")]
        poll_interval_ms: u64,

        /// Arguments passed to the task.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TaskLaneConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => TaskLaneConfig::default(),
    };
    let caller = CallerContext::new(cli.actor.as_str());

    match cli.command {
        Command::Platforms => {
            let registry = config.build_registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.summaries())?);
        }
        Command::Validate { task } => {
            let validator = TaskValidator::new(
                Arc::new(config.definition_store()),
                Arc::new(config.app_registry().await),
            );
            let report = validator.validate(&task).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_valid() {
                bail!("task '{task}' is not launchable");
            }
        }
        Command::Launch {
            task,
            platform,
            properties,
            wait,
            poll_interval_ms,
            args,
        } => {
            let mut command = LaunchCommand::new(task).with_args(args);
            if let Some(raw) = properties {
                command = command.with_properties(parse_properties(&raw)?);
            }
            if let Some(platform) = platform {
                command = command.on_platform(platform);
            }
            launch(&config, command, &caller, wait, Duration::from_millis(poll_interval_ms)).await?;
        }
    }
    Ok(())
}

async fn launch(
    config: &TaskLaneConfig,
    command: LaunchCommand,
    caller: &CallerContext,
    wait: bool,
    poll_interval: Duration,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(config.build_registry()?);
    let store = Arc::new(InMemoryExecutionStore::new(clock.clone()));
    let auditor = Auditor::new(
        Arc::new(InMemoryAuditSink::new()),
        Arc::new(UlidGenerator::new(clock.clone())),
        clock,
    );

    let mut orchestrator = TaskExecutionOrchestrator::new(
        registry.clone(),
        Arc::new(config.definition_store()),
        Arc::new(config.app_registry().await),
        store.clone(),
        auditor,
    )
    .with_common_properties(config.common_properties.clone())
    .with_store_timeout(config.store_timeout());
    if let Some(uri) = &config.server_uri {
        orchestrator = orchestrator.with_server_uri(uri);
    }

    let id = orchestrator.launch(command, caller).await?;
    tracing::info!(execution_id = %id, "launched");
    if !wait {
        print_view(&orchestrator.execution(id).await?)?;
        return Ok(());
    }

    let sync = Arc::new(StatusSynchronizer::new(registry, store).with_store_timeout(config.store_timeout()));
    let handle = sync.spawn(poll_interval);
    let view = wait_for_terminal(&orchestrator, id, poll_interval).await;
    handle.shutdown().await;

    let view = view?;
    print_view(&view)?;
    match view.execution.exit_code {
        Some(0) => Ok(()),
        Some(code) => bail!("{id} exited with code {code}"),
        None => bail!("{id} ended as {}", view.execution.status),
    }
}

async fn wait_for_terminal(
    orchestrator: &TaskExecutionOrchestrator,
    id: ExecutionId,
    poll_interval: Duration,
) -> Result<ExecutionView> {
    loop {
        let view = orchestrator.execution(id).await?;
        if view.execution.status.is_terminal() {
            return Ok(view);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn print_view(view: &ExecutionView) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(view)?);
    Ok(())
}
