//! TerminationDetector - 3 つの API 操作の入口
//!
//! サービス自体は状態を持たない。`Arc<dyn TaskStore>` と `Arc<dyn Clock>` だけを
//! 共有し、協調はすべてストアの条件付き書き込みで行う。
//!
//! # register / complete の書き込みループ
//! 1. レコードを読む（期限切れは存在しない扱い）
//! 2. `TaskRecord` 上で遷移を計算
//! 3. 読んだものがなければ `NotExists`、あれば `VersionIs(v)` で書く
//! 4. `Conflict` なら 1 に戻る。`max_write_attempts` 回で `Contention`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::app::config::DetectorConfig;
use crate::app::status::TerminationEvaluator;
use crate::domain::{
    CompletionResult, DetectorError, Heartbeat, ProcessId, ProcessReport, RegistrationResult,
    TaskId, TaskKey, TaskRecord, deadline_after,
};
use crate::ports::{Clock, StoreError, TaskStore, WriteCondition};

/// Outcome of a register/heartbeat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub result: RegistrationResult,
    pub record: TaskRecord,
}

/// Outcome of a completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub result: CompletionResult,
    pub record: TaskRecord,
}

/// TerminationDetector はタスクの登録・完了とプロセス状態の問い合わせを提供
///
/// `DetectorBuilder` から作る。Clone は同じストアと時計を共有する。
#[derive(Clone)]
pub struct TerminationDetector {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    evaluator: Arc<TerminationEvaluator>,
    retention: Duration,
    max_write_attempts: u32,
}

impl TerminationDetector {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        evaluator: TerminationEvaluator,
        config: &DetectorConfig,
    ) -> Self {
        Self {
            store,
            clock,
            evaluator: Arc::new(evaluator),
            retention: config.retention,
            max_write_attempts: config.max_write_attempts,
        }
    }

    /// Register a task or record a heartbeat.
    ///
    /// `heartbeat.reported_at` defaults to the service clock; a time in the
    /// future is clamped to now. `heartbeat.deadline` replaces the global
    /// staleness threshold for this task until a newer report changes it.
    pub async fn register_task(
        &self,
        process_id: &ProcessId,
        task_id: &TaskId,
        heartbeat: Heartbeat,
    ) -> Result<Registration, DetectorError> {
        let key = TaskKey::new(process_id.clone(), task_id.clone());
        let (result, record) = self
            .read_modify_write(&key, |current, now| {
                let report_time = heartbeat.reported_at.map_or(now, |at| at.min(now));
                let expires_at = deadline_after(now, self.retention);
                match current {
                    None => (
                        RegistrationResult::Created,
                        Some(
                            TaskRecord::new_pending(key.clone(), report_time, expires_at)
                                .with_deadline(heartbeat.deadline),
                        ),
                    ),
                    Some(mut record) => {
                        let result =
                            record.apply_register(report_time, heartbeat.deadline, expires_at);
                        (result, result.writes().then_some(record))
                    }
                }
            })
            .await?;

        debug!(
            process_id = %key.process_id,
            task_id = %key.task_id,
            ?result,
            last_report_time = %record.last_report_time,
            deadline = ?record.deadline,
            "task registered"
        );
        Ok(Registration { result, record })
    }

    /// Mark a task completed. Creates the record if the completion arrives first.
    pub async fn complete_task(
        &self,
        process_id: &ProcessId,
        task_id: &TaskId,
    ) -> Result<Completion, DetectorError> {
        let key = TaskKey::new(process_id.clone(), task_id.clone());
        let (result, record) = self
            .read_modify_write(&key, |current, now| {
                let expires_at = deadline_after(now, self.retention);
                match current {
                    None => (
                        CompletionResult::CreatedCompleted,
                        Some(TaskRecord::new_completed(key.clone(), now, expires_at)),
                    ),
                    Some(mut record) => {
                        let result = record.apply_complete(expires_at);
                        (result, result.writes().then_some(record))
                    }
                }
            })
            .await?;

        debug!(
            process_id = %key.process_id,
            task_id = %key.task_id,
            ?result,
            "task completed"
        );
        Ok(Completion { result, record })
    }

    /// Evaluate a process. Never fails for an unknown process: that is `UNKNOWN`.
    pub async fn process_status(
        &self,
        process_id: &ProcessId,
    ) -> Result<ProcessReport, DetectorError> {
        self.evaluator.evaluate(process_id, self.clock.now()).await
    }

    /// 楽観的並行制御の読み書きループ
    ///
    /// `transition` は現在のレコード（なければ `None`）から結果と書くべきレコードを返す。
    /// 書くものがなければ読んだレコードをそのまま返す。
    async fn read_modify_write<R, F>(
        &self,
        key: &TaskKey,
        transition: F,
    ) -> Result<(R, TaskRecord), DetectorError>
    where
        R: Copy,
        F: Fn(Option<TaskRecord>, DateTime<Utc>) -> (R, Option<TaskRecord>),
    {
        for attempt in 1..=self.max_write_attempts {
            let now = self.clock.now();
            let current = self.store.get(key, now).await?;
            let condition = match &current {
                None => WriteCondition::NotExists,
                Some(record) => WriteCondition::VersionIs(record.version),
            };

            let unchanged = current.clone();
            let (result, next) = transition(current, now);
            let Some(next) = next else {
                // 書き込み不要（AlreadyCompleted）。読んだものをそのまま返す
                if let Some(record) = unchanged {
                    return Ok((result, record));
                }
                continue;
            };

            match self.store.put(next, condition, now).await {
                Ok(written) => return Ok((result, written)),
                Err(StoreError::Conflict(_)) => {
                    debug!(%key, attempt, "conditional write conflicted; retrying");
                }
                Err(err @ StoreError::Unavailable(_)) => {
                    warn!(%key, error = %err, "task store unavailable");
                    return Err(err.into());
                }
            }
        }

        warn!(%key, attempts = self.max_write_attempts, "giving up after repeated conflicts");
        Err(DetectorError::Contention {
            key: key.clone(),
            attempts: self.max_write_attempts,
        })
    }
}
