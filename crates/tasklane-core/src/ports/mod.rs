//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部コラボレータ（永続化, 実行基盤, バッチエンジン, 監査ログ）への
//! インターフェースで、実装ごとに 1 つの variant を持ちます。
//!
//! # 設計原則
//! - ExecutionStore が実行レコードの正本（source of truth）
//! - LauncherBackend は実行基盤ごとに 1 実装
//! - すべての I/O は async（タイムアウトは呼び出し側で付ける）

pub mod app_resolver;
pub mod audit_sink;
pub mod batch_engine;
pub mod clock;
pub mod definition_store;
pub mod execution_store;
pub mod id_generator;
pub mod launcher;

pub use self::app_resolver::{AppResolver, ResolveError};
pub use self::audit_sink::{AuditError, AuditSink};
pub use self::batch_engine::{BatchEngine, BatchError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::definition_store::TaskDefinitionStore;
pub use self::execution_store::{
    CancelOutcome, DeletionBatch, ExecutionFilter, ExecutionStore, NewDeployment,
    RemovedExecution, StorageError,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::launcher::{LauncherBackend, LauncherError, RunStatus};
