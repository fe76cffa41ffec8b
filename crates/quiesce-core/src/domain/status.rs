//! Process status (aggregated from task records).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::ids::{ProcessId, TaskId};
use super::record::TaskRecord;
use super::state::TaskState;

/// Process status, derived from the visible task records on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Every visible task is completed.
    Terminated,

    /// At least one task is pending and none is stuck.
    Active,

    /// At least one pending task is suspected stuck. Vetoes termination.
    Stuck,

    /// No visible task: never registered, or everything expired.
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Terminated => "TERMINATED",
            ProcessStatus::Active => "ACTIVE",
            ProcessStatus::Stuck => "STUCK",
            ProcessStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state counts over the visible records of a process.
///
/// `stuck` tasks are also counted in `pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub stuck: usize,
    pub completed: usize,
}

impl TaskCounts {
    /// A pending task counts as stuck only while it is both stamped and stale.
    pub fn tally<'a>(
        records: impl IntoIterator<Item = &'a TaskRecord>,
        now: DateTime<Utc>,
        staleness_threshold: Duration,
    ) -> Self {
        let mut counts = TaskCounts::default();
        for record in records {
            counts.total += 1;
            match record.state {
                TaskState::Pending => {
                    counts.pending += 1;
                    if record.is_stuck(now, staleness_threshold) {
                        counts.stuck += 1;
                    }
                }
                TaskState::Completed => counts.completed += 1,
            }
        }
        counts
    }

    /// Priority order: all completed, then any stuck, then active.
    pub fn status(&self) -> ProcessStatus {
        if self.total == 0 {
            ProcessStatus::Unknown
        } else if self.completed == self.total {
            ProcessStatus::Terminated
        } else if self.stuck > 0 {
            ProcessStatus::Stuck
        } else {
            ProcessStatus::Active
        }
    }
}

/// The oldest outstanding stuck task of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckTask {
    pub task_id: TaskId,
    pub bad_state_enter_time: DateTime<Utc>,
    pub last_report_time: DateTime<Utc>,
}

/// Process status for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub id: ProcessId,
    pub status: ProcessStatus,

    /// Present exactly when `status` is `Stuck`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_stuck_task: Option<StuckTask>,

    pub counts: TaskCounts,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskKey;
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;

    const THRESHOLD: Duration = Duration::from_secs(15 * 60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// 評価時刻。閾値を過ぎているので stamp 付きの Pending は stuck
    fn later() -> DateTime<Utc> {
        t0() + TimeDelta::minutes(20)
    }

    fn tally(records: &[TaskRecord]) -> TaskCounts {
        TaskCounts::tally(records, later(), THRESHOLD)
    }

    fn record(task: &str, state: TaskState, stuck: bool) -> TaskRecord {
        let now = t0();
        let key = TaskKey::new(ProcessId::parse("p").unwrap(), TaskId::parse(task).unwrap());
        let mut record = match state {
            TaskState::Pending => TaskRecord::new_pending(key, now, now + TimeDelta::hours(1)),
            TaskState::Completed => TaskRecord::new_completed(key, now, now + TimeDelta::hours(1)),
        };
        if stuck {
            record.stamp_stuck(later());
        }
        record
    }

    #[test]
    fn no_records_is_unknown() {
        let counts = tally(&[]);
        assert_eq!(counts, TaskCounts::default());
        assert_eq!(counts.status(), ProcessStatus::Unknown);
    }

    #[test]
    fn all_completed_is_terminated() {
        let records = vec![
            record("a", TaskState::Completed, false),
            record("b", TaskState::Completed, false),
        ];
        assert_eq!(tally(&records).status(), ProcessStatus::Terminated);
    }

    #[rstest]
    #[case::only_pending(vec![(TaskState::Pending, false)])]
    #[case::mixed(vec![(TaskState::Completed, false), (TaskState::Pending, false)])]
    fn fresh_pending_is_active(#[case] tasks: Vec<(TaskState, bool)>) {
        let records: Vec<_> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, (state, stuck))| record(&format!("t{i}"), state, stuck))
            .collect();
        assert_eq!(tally(&records).status(), ProcessStatus::Active);
    }

    #[test]
    fn a_single_stuck_task_vetoes_everything_else() {
        let records = vec![
            record("a", TaskState::Completed, false),
            record("b", TaskState::Pending, false),
            record("c", TaskState::Pending, true),
        ];
        let counts = tally(&records);

        assert_eq!(
            counts,
            TaskCounts {
                total: 3,
                pending: 2,
                stuck: 1,
                completed: 1
            }
        );
        assert_eq!(counts.status(), ProcessStatus::Stuck);
    }

    #[test]
    fn a_stamp_on_a_fresh_record_does_not_count() {
        let mut refreshed = record("a", TaskState::Pending, true);
        refreshed.last_report_time = later();

        let counts = tally(&[refreshed]);
        assert_eq!(counts.stuck, 0);
        assert_eq!(counts.status(), ProcessStatus::Active);
    }

    #[test]
    fn report_serializes_without_oldest_when_not_stuck() {
        let report = ProcessReport {
            id: ProcessId::parse("p").unwrap(),
            status: ProcessStatus::Active,
            oldest_stuck_task: None,
            counts: TaskCounts::default(),
            evaluated_at: t0(),
        };
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "ACTIVE");
        assert!(json.get("oldestStuckTask").is_none());

        let parsed: ProcessReport = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, report);
    }
}
