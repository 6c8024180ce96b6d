//! tasklane-core
//!
//! タスク実行オーケストレーションの中核です。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, execution, job, platform, audit, errors）
//! - **ports**: 抽象化レイヤー（ExecutionStore, LauncherBackend, BatchEngine, AuditSink, など）
//! - **app**: アプリケーションロジック（orchestrator, job_bridge, deletion, status_sync, reaper, など）
//! - **impls**: 実装（InMemoryExecutionStore, LocalLauncher, ScriptedLauncher など）
//! - **config**: TOML 設定と PlatformRegistry の組み立て
//! - **observability**: 状態別の件数など

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
