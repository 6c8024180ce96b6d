//! Auditor - 監査レコードの組み立てと追記
//!
//! 追記に失敗しても呼び出し元の結果は変えません（warn ログのみ）。

use std::sync::Arc;

use crate::domain::{AuditAction, AuditOutcome, AuditRecord, CallerContext};
use crate::ports::{AuditSink, Clock, IdGenerator};

#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, ids, clock }
    }

    pub async fn record(
        &self,
        action: AuditAction,
        target: impl Into<String>,
        caller: &CallerContext,
        outcome: AuditOutcome,
        data: serde_json::Value,
    ) {
        let record = AuditRecord {
            id: self.ids.generate_audit_id(),
            action,
            target: target.into(),
            actor: caller.actor.clone(),
            timestamp: self.clock.now(),
            outcome,
            data,
        };
        let (id, target) = (record.id, record.target.clone());
        if let Err(e) = self.sink.append(record).await {
            tracing::warn!(audit_id = %id, action = ?action, target = %target, error = %e, "audit append failed");
        }
    }
}
