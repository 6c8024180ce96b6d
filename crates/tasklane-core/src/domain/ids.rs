//! Domain identifiers (strongly-typed IDs).
//!
//! # Phantom Type パターン
//! `Id<T>` は共通実装を一つにまとめつつ、`T`（実行時には使わないマーカー型）で
//! ExecutionId と JobExecutionId の取り違えをコンパイル時に防ぎます。
//!
//! 実行 ID / ジョブ ID は採番元（Execution Record Store, Batch Engine）が
//! 単調増加の `u64` で払い出します。監査レコードの ID は採番元を持たないため
//! ULID を使います（[`AuditId`]）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each id family.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix (e.g. "exec-").
    fn prefix() -> &'static str;
}

/// Generic numeric id.
///
/// Serialized as the bare number so that records stay readable in JSON.
#[repr(transparent)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

// derive では `T: Clone` などが要求されてしまうため手書きする
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task execution marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Execution {}

impl IdMarker for Execution {
    fn prefix() -> &'static str {
        "exec-"
    }
}

/// Batch job execution marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobExec {}

impl IdMarker for JobExec {
    fn prefix() -> &'static str {
        "jobexec-"
    }
}

/// Batch job instance marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobInst {}

impl IdMarker for JobInst {
    fn prefix() -> &'static str {
        "jobinst-"
    }
}

/// Batch step execution marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepExec {}

impl IdMarker for StepExec {
    fn prefix() -> &'static str {
        "step-"
    }
}

/// Identifier of a task execution (one launch attempt).
pub type ExecutionId = Id<Execution>;

/// Identifier of a batch job execution.
pub type JobExecutionId = Id<JobExec>;

/// Identifier of a batch job instance.
pub type JobInstanceId = Id<JobInst>;

/// Identifier of a batch step execution.
pub type StepExecutionId = Id<StepExec>;

/// Identifier of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(Ulid);

impl AuditId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for AuditId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audit-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let exec = ExecutionId::new(7);
        let job = JobExecutionId::new(7);

        assert_eq!(exec.value(), job.value());
        assert_eq!(exec.to_string(), "exec-7");
        assert_eq!(job.to_string(), "jobexec-7");

        // let _: ExecutionId = job; // <- does not compile
    }

    #[test]
    fn ids_order_by_value() {
        let mut ids = vec![ExecutionId::new(3), ExecutionId::new(1), ExecutionId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![ExecutionId::new(1), ExecutionId::new(2), ExecutionId::new(3)]);
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let s = serde_json::to_string(&ExecutionId::new(42)).unwrap();
        assert_eq!(s, "42");

        let back: ExecutionId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, ExecutionId::new(42));
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<ExecutionId>(), size_of::<u64>());
        assert_eq!(size_of::<AuditId>(), size_of::<Ulid>());
    }

    #[test]
    fn audit_id_has_prefix() {
        let id = AuditId::from(Ulid::new());
        assert!(id.to_string().starts_with("audit-"));
    }
}
