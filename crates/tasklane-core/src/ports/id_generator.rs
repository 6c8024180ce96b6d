//! IdGenerator port - ID 生成の抽象化
//!
//! 実行 ID は Execution Record Store が採番するため、ここで扱うのは
//! 採番元を持たない監査レコードの ID だけです。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::AuditId;
use crate::ports::Clock;
use std::sync::Arc;
use ulid::Ulid;

/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_audit_id(&self) -> AuditId;
}

/// Clock を使って現在時刻ベースの ULID を生成します。
/// テスト時に FixedClock を使うと timestamp 部分が決定的になります。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_audit_id(&self) -> AuditId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        AuditId::from(ulid)
    }
}
