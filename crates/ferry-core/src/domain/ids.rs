//! Domain identifiers.
//!
//! # RecordId
//! ULID ベースの ID。
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 複数の writer が調整なしで生成できる
//!
//! # MachineId
//! Dispatcher インスタンスの識別子。lock の owner token として使う。
//! 同じ Store を共有するインスタンス同士は必ず異なる MachineId を持つこと。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of an outbox record.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Ulid);

impl RecordId {
    /// ULID から RecordId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for RecordId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec-{}", self.0)
    }
}

/// Identity of a dispatcher instance (lock owner token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `ferry-<ulid>` 形式の ID を生成
    pub fn generate() -> Self {
        Self(format!("ferry-{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for MachineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MachineId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_display_has_prefix() {
        let ulid = Ulid::new();
        let id = RecordId::from_ulid(ulid);
        assert_eq!(id.as_ulid(), ulid);
        assert_eq!(id.to_string(), format!("rec-{ulid}"));
    }

    #[test]
    fn record_ids_are_sortable() {
        let id1 = RecordId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2)); // 時刻が進むのを待つ
        let id2 = RecordId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn record_id_serializes_as_plain_ulid() {
        let id = RecordId::from_ulid(Ulid::new());

        let serialized = serde_json::to_string(&id).unwrap();
        assert_eq!(serialized, format!("\"{}\"", id.as_ulid()));

        let deserialized: RecordId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn generated_machine_ids_are_unique() {
        let a = MachineId::generate();
        let b = MachineId::generate();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("ferry-"));
        assert!(!a.is_empty());
    }

    #[test]
    fn blank_machine_id_is_empty() {
        assert!(MachineId::from("  ").is_empty());
    }
}
