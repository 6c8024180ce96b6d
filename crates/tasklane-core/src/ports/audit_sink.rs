//! AuditSink port - 監査レコードの追記（append-only）

use async_trait::async_trait;

use crate::domain::AuditRecord;

#[derive(Debug, thiserror::Error)]
#[error("audit sink unavailable: {0}")]
pub struct AuditError(pub String);

/// 追記のみ。更新・削除の操作は持たない。
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}
