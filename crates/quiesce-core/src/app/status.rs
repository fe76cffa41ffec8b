//! Status - プロセスの終了判定
//!
//! プロセスの状態は保存しない。問い合わせのたびに、見えているタスクレコードの
//! 集合から導出する。
//!
//! # 判定の優先順位
//! 1. レコードがない → UNKNOWN
//! 2. 全て Completed → TERMINATED
//! 3. stuck な Pending が 1 つでもある → STUCK（他の状態を拒否権で上書き）
//!    stuck は「stamp あり、かつ今もまだ stale」。stamp だけでは数えない
//! 4. それ以外 → ACTIVE

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::app::detector::StuckDetector;
use crate::domain::{
    DetectorError, ProcessId, ProcessReport, ProcessStatus, StuckTask, TaskCounts, TaskRecord,
};
use crate::ports::TaskStore;

/// TerminationEvaluator はプロセスの状態を評価する
///
/// 評価の途中で stale なタスクを見つけたら `StuckDetector` が stamp するので、
/// 同じ問い合わせの結果にすぐ反映される。
pub struct TerminationEvaluator {
    store: Arc<dyn TaskStore>,
    detector: StuckDetector,
}

impl TerminationEvaluator {
    pub fn new(store: Arc<dyn TaskStore>, detector: StuckDetector) -> Self {
        Self { store, detector }
    }

    pub async fn evaluate(
        &self,
        process_id: &ProcessId,
        now: DateTime<Utc>,
    ) -> Result<ProcessReport, DetectorError> {
        let scanned = self.store.scan_process(process_id, now).await?;

        let mut records = Vec::with_capacity(scanned.len());
        for record in scanned {
            if let Some(observed) = self.detector.observe(record, now).await? {
                records.push(observed);
            }
        }

        let threshold = self.detector.staleness_threshold();
        let counts = TaskCounts::tally(&records, now, threshold);
        let status = counts.status();
        let oldest_stuck_task = match status {
            ProcessStatus::Stuck => self.oldest_stuck(process_id, &records, now).await?,
            _ => None,
        };

        match status {
            ProcessStatus::Stuck | ProcessStatus::Terminated => info!(
                %process_id,
                %status,
                total = counts.total,
                stuck = counts.stuck,
                "process evaluated"
            ),
            _ => debug!(%process_id, %status, total = counts.total, "process evaluated"),
        }

        Ok(ProcessReport {
            id: process_id.clone(),
            status,
            oldest_stuck_task,
            counts,
            evaluated_at: now,
        })
    }

    /// stuck インデックスの先頭。評価中に消えていたか、もう stale でなければ
    /// スナップショットの最小値で補う
    async fn oldest_stuck(
        &self,
        process_id: &ProcessId,
        records: &[TaskRecord],
        now: DateTime<Utc>,
    ) -> Result<Option<StuckTask>, DetectorError> {
        let threshold = self.detector.staleness_threshold();
        let indexed = self
            .store
            .oldest_stuck(process_id, now)
            .await?
            .filter(|record| record.is_stuck(now, threshold));
        let oldest = indexed.or_else(|| {
            records
                .iter()
                .filter(|record| record.is_stuck(now, threshold))
                .min_by_key(|record| (record.bad_state_enter_time, record.key.task_id.clone()))
                .cloned()
        });

        Ok(oldest.and_then(|record| {
            record.bad_state_enter_time.map(|bad_state_enter_time| StuckTask {
                task_id: record.key.task_id,
                bad_state_enter_time,
                last_report_time: record.last_report_time,
            })
        }))
    }
}
