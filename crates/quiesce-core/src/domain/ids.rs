//! Domain identifiers (strongly-typed IDs).
//!
//! process_id / task_id は呼び出し側が決める不透明な文字列です。
//! Phantom type パターンで `ProcessId` と `TaskId` を別の型にしつつ、
//! 検証・表示・serde の実装は `Id<T>` に一本化しています。
//!
//! ## 検証ルール
//! - 前後の空白を除いて空でないこと
//! - 1024 bytes 以下（KVS のキー長上限に合わせる）
//! - ASCII 制御文字を含まないこと

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::errors::DetectorError;

/// Maximum length of an identifier in bytes.
pub const MAX_ID_LEN: usize = 1024;

/// IdMarker は各 ID 型のマーカー trait
///
/// エラーメッセージで使う種別名（"process", "task"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn kind() -> &'static str;
}

/// ジェネリック ID 型
///
/// # 例
/// ```ignore
/// let process_id = ProcessId::parse("billing-run-42")?;
/// let task_id = TaskId::parse("shard-7")?;
/// // process_id と task_id は異なる型なので、混同できない
/// ```
pub struct Id<T: IdMarker> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 文字列を検証して Id を作成
    pub fn parse(value: impl Into<String>) -> Result<Self, DetectorError> {
        let value = value.into();
        let invalid = |reason: &str| DetectorError::InvalidInput {
            kind: T::kind(),
            reason: reason.to_string(),
        };

        if value.trim().is_empty() {
            return Err(invalid("must not be empty"));
        }
        if value.len() > MAX_ID_LEN {
            return Err(invalid(&format!("must be at most {MAX_ID_LEN} bytes")));
        }
        if value.chars().any(|c| c.is_ascii_control()) {
            return Err(invalid("must not contain control characters"));
        }

        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

// derive だと `T: Clone` などの境界が付いてしまうので手で実装する

impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
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

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", T::kind(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: IdMarker> std::str::FromStr for Id<T> {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Process のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Process {}

impl IdMarker for Process {
    fn kind() -> &'static str {
        "process"
    }
}

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn kind() -> &'static str {
        "task"
    }
}

/// Identifier of a Process (the partition every task record lives in).
pub type ProcessId = Id<Process>;

/// Identifier of a Task, unique within its Process.
pub type TaskId = Id<Task>;

/// Primary key of a task record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskKey {
    pub process_id: ProcessId,
    pub task_id: TaskId,
}

impl TaskKey {
    pub fn new(process_id: ProcessId, task_id: TaskId) -> Self {
        Self {
            process_id,
            task_id,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_id, self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parse_keeps_value_verbatim() {
        let id = ProcessId::parse("  run 42 ").unwrap();
        assert_eq!(id.as_str(), "  run 42 ");
        assert_eq!(id.to_string(), "  run 42 ");
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    #[case::newline("a\nb")]
    #[case::nul("a\0b")]
    fn parse_rejects_malformed_ids(#[case] raw: &str) {
        let err = TaskId::parse(raw).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidInput { kind: "task", .. }));
    }

    #[test]
    fn parse_rejects_oversized_ids() {
        let raw = "x".repeat(MAX_ID_LEN + 1);
        assert!(ProcessId::parse(raw).is_err());
        assert!(ProcessId::parse("x".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: TaskId = serde_json::from_str("\"t-1\"").unwrap();
        assert_eq!(ok.as_str(), "t-1");

        let err = serde_json::from_str::<TaskId>("\"\"");
        assert!(err.is_err());
    }

    #[test]
    fn keys_order_by_process_then_task() {
        let key = |p: &str, t: &str| {
            TaskKey::new(ProcessId::parse(p).unwrap(), TaskId::parse(t).unwrap())
        };
        let mut keys = vec![key("p2", "a"), key("p1", "b"), key("p1", "a")];
        keys.sort();
        assert_eq!(keys, vec![key("p1", "a"), key("p1", "b"), key("p2", "a")]);
        assert_eq!(key("p1", "a").to_string(), "p1/a");
    }
}
