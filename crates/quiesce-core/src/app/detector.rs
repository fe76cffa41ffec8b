//! StuckDetector - 遅延 stuck 判定
//!
//! 評価時に読んだレコードが「Pending・フラグなし・期限または閾値超過」なら、その場で
//! `bad_state_enter_time = now` を条件付きで書く。バックグラウンドのスキャンはしない。
//! 条件はストア側で書き込み時のレコードに対して評価し直す。
//!
//! # 競合時の方針
//! - 条件付き書き込みが `Conflict` になったら 1 回だけ読み直し、ストアの内容を採用する
//! - stamp 自体は再試行しない（他の評価者が付けた stamp か、完了か、heartbeat のどれか）

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{DetectorError, TaskRecord};
use crate::ports::{StoreError, TaskStore};

pub struct StuckDetector {
    store: Arc<dyn TaskStore>,
    staleness_threshold: Duration,
}

impl StuckDetector {
    pub fn new(store: Arc<dyn TaskStore>, staleness_threshold: Duration) -> Self {
        Self {
            store,
            staleness_threshold,
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Stamp `record` if it is stale and unflagged, and return what the store now holds.
    ///
    /// Returns `None` only when the record disappeared (expired) between the
    /// scan and the re-read.
    pub async fn observe(
        &self,
        record: TaskRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, DetectorError> {
        if !record.needs_stuck_stamp(now, self.staleness_threshold) {
            return Ok(Some(record));
        }

        match self
            .store
            .mark_stuck(&record.key, self.staleness_threshold, now)
            .await {
            Ok(stamped) => {
                info!(
                    process_id = %stamped.key.process_id,
                    task_id = %stamped.key.task_id,
                    last_report_time = %stamped.last_report_time,
                    "task flagged stuck"
                );
                Ok(Some(stamped))
            }
            Err(StoreError::Conflict(key)) => {
                warn!(
                    process_id = %key.process_id,
                    task_id = %key.task_id,
                    "stuck stamp lost a race; adopting stored record"
                );
                Ok(self.store.get(&key, now).await?)
            }
            Err(err @ StoreError::Unavailable(_)) => {
                warn!(error = %err, "stuck stamp failed");
                Err(err.into())
            }
        }
    }
}
