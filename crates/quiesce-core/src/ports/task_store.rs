//! TaskStore port - タスクレコードの正本（source of truth）
//!
//! 想定しているのは DynamoDB のような KVS で、効率よくできるのは次の 2 つだけ：
//! - (process_id, task_id) による 1 レコードの読み書き
//! - process_id 内での bad_state_enter_time 順のレンジスキャン（二次インデックス）
//!
//! すべての協調は条件付き書き込み（楽観的並行制御）で行い、ロックは使わない。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{DetectorError, ProcessId, TaskKey, TaskRecord};

/// 書き込み条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// 見えるレコードが存在しない（期限切れは存在しない扱い）
    NotExists,
    /// 読んだ時点から誰も書いていない
    VersionIs(u64),
}

impl WriteCondition {
    /// `current` はキーに対する「見えている」レコード
    pub fn holds(self, current: Option<&TaskRecord>) -> bool {
        match (self, current) {
            (WriteCondition::NotExists, None) => true,
            (WriteCondition::NotExists, Some(_)) => false,
            (WriteCondition::VersionIs(version), Some(record)) => record.version == version,
            (WriteCondition::VersionIs(_), None) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// 条件付き書き込みの条件が成り立たなかった
    #[error("conditional write failed for {0}")]
    Conflict(TaskKey),

    /// ストアに到達できない、または操作を拒否された
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for DetectorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => DetectorError::StoreUnavailable(message),
            // 呼び出し側で解決されるべきもの。ここまで来たら一時的な失敗として扱う
            StoreError::Conflict(key) => DetectorError::Contention { key, attempts: 1 },
        }
    }
}

/// TaskStore はタスクレコードと stuck インデックスを保持する
///
/// # 設計原則
/// - `now` は呼び出し側の Clock から渡す。`expires_at <= now` のレコードはどの操作からも見えない
/// - 書き込みはレコード単位でアトミック。成功すると version が 1 増える
/// - stuck インデックスの更新はレコードの書き込みと同時に行う
///   （フラグが付いたら挿入、外れたら削除。値の書き換えは起きない）
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 1 レコードを読む
    async fn get(&self, key: &TaskKey, now: DateTime<Utc>)
    -> Result<Option<TaskRecord>, StoreError>;

    /// 条件付きで 1 レコードを書く。書いた後のレコード（新しい version 付き）を返す
    async fn put(
        &self,
        record: TaskRecord,
        condition: WriteCondition,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError>;

    /// stuck フラグだけを書く属性単位の条件付き更新
    ///
    /// 見えているレコードが `now` の時点でまだ stamp を必要としている
    /// （Pending・フラグなし・期限または閾値を超過）ときだけ
    /// `bad_state_enter_time = now` を設定する。条件は書き込み時のレコードで
    /// 判定するので、スキャン後に届いた heartbeat で新しくなったレコードには付かない。
    /// 他の属性には触れない。条件が成り立たなければ `Conflict`。
    async fn mark_stuck(
        &self,
        key: &TaskKey,
        staleness_threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError>;

    /// プロセスの見えているレコードをすべて返す（task_id 順、強い整合性）
    async fn scan_process(
        &self,
        process_id: &ProcessId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// stuck インデックスの先頭（bad_state_enter_time が最も古いもの）
    async fn oldest_stuck(
        &self,
        process_id: &ProcessId,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// 期限切れのレコードを物理削除し、削除した件数を返す
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
