//! Task record: the single stored entity, plus its state transitions.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskKey;
use super::state::TaskState;

/// One record per `(process_id, task_id)`.
///
/// Design:
/// - This is the "single source of truth" for task state; a process is only
///   the set of records sharing a `process_id`.
/// - All state transitions happen here, the store only persists the result.
/// - `version` is owned by the store and bumped on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(flatten)]
    pub key: TaskKey,
    pub state: TaskState,

    /// Most recent start/heartbeat report (completion time for tasks that
    /// were completed without ever registering).
    pub last_report_time: DateTime<Utc>,

    /// Set when the task was first suspected stuck; cleared on recovery or completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_state_enter_time: Option<DateTime<Utc>>,

    /// Caller-supplied instant after which a silent pending task is stale.
    /// Without one the service-wide staleness threshold applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// The ttl. Past this instant the record is invisible.
    pub expires_at: DateTime<Utc>,

    #[serde(skip)]
    pub version: u64,
}

/// A register/heartbeat report as the caller sent it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// When the task was last seen alive. `None` means the service clock.
    pub reported_at: Option<DateTime<Utc>>,
    /// Per-task staleness deadline.
    pub deadline: Option<DateTime<Utc>>,
}

impl Heartbeat {
    /// Alive now, global threshold.
    pub fn now() -> Self {
        Self::default()
    }

    pub fn at(reported_at: DateTime<Utc>) -> Self {
        Self {
            reported_at: Some(reported_at),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What a register/heartbeat report did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationResult {
    /// No visible record existed; a `Pending` one was created.
    Created,
    /// The report was newer than the stored one; it advanced `last_report_time`.
    Refreshed,
    /// Duplicate or reordered report; only the ttl was refreshed.
    Unchanged,
    /// The task is completed; nothing was written.
    AlreadyCompleted,
}

impl RegistrationResult {
    /// Does this result need a store write?
    pub fn writes(self) -> bool {
        !matches!(self, RegistrationResult::AlreadyCompleted)
    }
}

/// What a completion report did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionResult {
    /// No visible record existed; a `Completed` one was created.
    CreatedCompleted,
    /// A `Pending` record moved to `Completed`.
    Completed,
    /// The task was already completed; nothing was written.
    AlreadyCompleted,
}

impl CompletionResult {
    pub fn writes(self) -> bool {
        !matches!(self, CompletionResult::AlreadyCompleted)
    }
}

/// `at + duration`, saturating instead of overflowing.
pub fn deadline_after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl TaskRecord {
    /// A freshly registered task.
    pub fn new_pending(key: TaskKey, report_time: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key,
            state: TaskState::Pending,
            last_report_time: report_time,
            bad_state_enter_time: None,
            deadline: None,
            expires_at,
            version: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    /// A task whose completion arrived before (or without) any register report.
    pub fn new_completed(key: TaskKey, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key,
            state: TaskState::Completed,
            last_report_time: now,
            bad_state_enter_time: None,
            deadline: None,
            expires_at,
            version: 0,
        }
    }

    /// Apply a register/heartbeat report.
    ///
    /// Last-writer-wins by report time, not by arrival: an older report never
    /// moves `last_report_time` back and is no evidence of recovery, so it
    /// keeps the stuck stamp and the deadline it was stamped against.
    pub fn apply_register(
        &mut self,
        report_time: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
        expires_at: DateTime<Utc>,
    ) -> RegistrationResult {
        if self.state.is_terminal() {
            return RegistrationResult::AlreadyCompleted;
        }

        self.expires_at = expires_at;
        if report_time > self.last_report_time {
            self.last_report_time = report_time;
            self.deadline = deadline;
            self.bad_state_enter_time = None;
            RegistrationResult::Refreshed
        } else {
            RegistrationResult::Unchanged
        }
    }

    /// Apply a completion report.
    ///
    /// The stuck stamp is cleared unconditionally so that a stamp written
    /// concurrently can never outlive the completion.
    pub fn apply_complete(&mut self, expires_at: DateTime<Utc>) -> CompletionResult {
        if self.state.is_terminal() {
            return CompletionResult::AlreadyCompleted;
        }

        self.state = TaskState::Completed;
        self.bad_state_enter_time = None;
        self.expires_at = expires_at;
        CompletionResult::Completed
    }

    /// Set the stuck stamp. Only meaningful on a pending, unstamped record.
    pub fn stamp_stuck(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.state == TaskState::Pending && self.bad_state_enter_time.is_none());
        self.bad_state_enter_time = Some(now);
    }

    /// Has the ttl not yet passed?
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Pending and past its deadline, or silent for longer than `threshold`
    /// when it has none.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let silent_until = self
            .deadline
            .unwrap_or_else(|| deadline_after(self.last_report_time, threshold));
        self.state == TaskState::Pending && silent_until < now
    }

    /// Pending and carrying a stuck stamp, whether or not it is still stale.
    pub fn has_stuck_stamp(&self) -> bool {
        self.state == TaskState::Pending && self.bad_state_enter_time.is_some()
    }

    /// Stamped and still stale.
    pub fn is_stuck(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.has_stuck_stamp() && self.is_stale(now, threshold)
    }

    /// Pending, unstamped, and stale: the detector should stamp it.
    pub fn needs_stuck_stamp(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.bad_state_enter_time.is_none() && self.is_stale(now, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessId, TaskId};
    use chrono::TimeZone;
    use rstest::rstest;

    fn key() -> TaskKey {
        TaskKey::new(ProcessId::parse("p1").unwrap(), TaskId::parse("t1").unwrap())
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap()
    }

    fn pending_at(minute: u32) -> TaskRecord {
        TaskRecord::new_pending(key(), at(minute), at(minute) + TimeDelta::hours(168))
    }

    #[test]
    fn newer_report_refreshes_and_clears_stamp() {
        let mut record = pending_at(0);
        record.stamp_stuck(at(30));

        let result = record.apply_register(at(31), None, at(59));

        assert_eq!(result, RegistrationResult::Refreshed);
        assert_eq!(record.last_report_time, at(31));
        assert_eq!(record.bad_state_enter_time, None);
        assert_eq!(record.expires_at, at(59));
    }

    #[rstest]
    #[case::duplicate(10)]
    #[case::reordered(5)]
    fn older_or_equal_report_keeps_last_report_time(#[case] minute: u32) {
        let mut record = pending_at(10);
        record.stamp_stuck(at(40));

        let result = record.apply_register(at(minute), None, at(59));

        assert_eq!(result, RegistrationResult::Unchanged);
        assert_eq!(record.last_report_time, at(10));
        assert_eq!(record.bad_state_enter_time, Some(at(40)));
        assert_eq!(record.expires_at, at(59));
    }

    #[test]
    fn register_after_completion_is_a_noop() {
        let mut record = TaskRecord::new_completed(key(), at(0), at(50));
        let before = record.clone();

        assert_eq!(
            record.apply_register(at(20), None, at(59)),
            RegistrationResult::AlreadyCompleted
        );
        assert_eq!(record, before);
        assert!(!RegistrationResult::AlreadyCompleted.writes());
    }

    #[test]
    fn completion_clears_stamp_and_is_sticky() {
        let mut record = pending_at(0);
        record.stamp_stuck(at(30));

        assert_eq!(record.apply_complete(at(59)), CompletionResult::Completed);
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.bad_state_enter_time, None);

        assert_eq!(record.apply_complete(at(59)), CompletionResult::AlreadyCompleted);
        assert_eq!(record.state, TaskState::Completed);
    }

    #[rstest]
    #[case::fresh(10, false)]
    #[case::exactly_at_threshold(15, false)]
    #[case::past_threshold(16, true)]
    fn staleness_is_strictly_greater_than_threshold(#[case] now: u32, #[case] stale: bool) {
        let record = pending_at(0);
        let threshold = Duration::from_secs(15 * 60);

        assert_eq!(record.is_stale(at(now), threshold), stale);
        assert_eq!(record.needs_stuck_stamp(at(now), threshold), stale);
    }

    #[test]
    fn completed_tasks_are_never_stale() {
        let record = TaskRecord::new_completed(key(), at(0), at(59));
        assert!(!record.is_stale(at(59), Duration::from_secs(60)));
        assert!(!record.is_stuck(at(59), Duration::from_secs(60)));
    }

    #[rstest]
    #[case::before_deadline(20, false)]
    #[case::at_deadline(30, false)]
    #[case::past_deadline(31, true)]
    fn deadline_overrides_the_threshold(#[case] now: u32, #[case] stale: bool) {
        // 閾値だけなら 16 分で stale だが、期限は 30 分
        let record = pending_at(0).with_deadline(Some(at(30)));
        let threshold = Duration::from_secs(15 * 60);

        assert_eq!(record.is_stale(at(now), threshold), stale);
    }

    #[test]
    fn newer_report_replaces_the_deadline_older_keeps_it() {
        let threshold = Duration::from_secs(15 * 60);
        let mut record = pending_at(0).with_deadline(Some(at(5)));

        record.apply_register(at(0), Some(at(50)), at(59));
        assert_eq!(record.deadline, Some(at(5)));

        record.apply_register(at(10), Some(at(50)), at(59));
        assert_eq!(record.deadline, Some(at(50)));
        assert!(!record.is_stale(at(45), threshold));

        // 期限なしの新しい報告は閾値に戻る
        record.apply_register(at(20), None, at(59));
        assert_eq!(record.deadline, None);
        assert!(record.is_stale(at(36), threshold));
    }

    #[test]
    fn a_stamp_on_a_record_that_is_no_longer_stale_is_not_stuck() {
        let threshold = Duration::from_secs(15 * 60);
        let mut record = pending_at(0);
        record.stamp_stuck(at(20));

        assert!(record.is_stuck(at(20), threshold));
        assert!(record.has_stuck_stamp());
        // 閾値が延びた再起動後などは stamp が残っていても stuck ではない
        assert!(!record.is_stuck(at(20), Duration::from_secs(30 * 60)));
    }

    #[test]
    fn visibility_ends_at_expiry() {
        let record = TaskRecord::new_pending(key(), at(0), at(10));
        assert!(record.is_visible(at(9)));
        assert!(!record.is_visible(at(10)));
    }

    #[test]
    fn deadline_after_saturates() {
        assert_eq!(deadline_after(at(0), Duration::from_secs(60)), at(1));
        assert_eq!(
            deadline_after(at(0), Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn serializes_for_api_views() {
        let mut record = pending_at(0);
        record.version = 7;
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["processId"], "p1");
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["state"], "PENDING");
        assert!(json.get("badStateEnterTime").is_none());
        assert!(json.get("deadline").is_none());
        assert!(json.get("version").is_none());
    }
}
