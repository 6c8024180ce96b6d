//! Audit records: append-only trail of orchestration actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AuditId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Launch,
    Cancel,
    Restart,
    Stop,
    Delete,
    CreateDefinition,
    DestroyDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// Some targets were handled, some refused.
    Partial(String),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub action: AuditAction,
    /// Execution id, job execution id or task name, depending on the action.
    pub target: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    /// Structured detail (e.g. the list of removed records).
    pub data: serde_json::Value,
}
