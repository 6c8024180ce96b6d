//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryExecutionStore**: 実行レコードの正本（開発・テスト用）
//! - **InMemoryDefinitionStore / InMemoryAppRegistry**: タスク定義と app 解決
//! - **InMemoryBatchEngine**: バッチエンジンの代替
//! - **InMemoryAuditSink**: 追記のみの監査ログ
//! - **LocalLauncher**: ローカルプロセスとして起動する launcher
//! - **ScriptedLauncher**: 応答を外から指定できる launcher（テスト用）
//!
//! 永続化や外部実行基盤向けの実装は別クレートに置く想定です。

pub mod inmem_audit;
pub mod inmem_batch;
pub mod inmem_definitions;
pub mod inmem_execution_store;
pub mod local_launcher;
pub mod scripted_launcher;

pub use self::inmem_audit::InMemoryAuditSink;
pub use self::inmem_batch::InMemoryBatchEngine;
pub use self::inmem_definitions::{InMemoryAppRegistry, InMemoryDefinitionStore};
pub use self::inmem_execution_store::InMemoryExecutionStore;
pub use self::local_launcher::LocalLauncher;
pub use self::scripted_launcher::{LaunchBehavior, ScriptedLauncher};
