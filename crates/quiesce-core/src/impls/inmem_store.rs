//! In-memory task store implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{ProcessId, TaskId, TaskKey, TaskRecord};
use crate::ports::{StoreError, TaskStore, WriteCondition};

/// Stuck index entry. Ordered by stamp time first, task id breaks ties.
type StuckEntry = (DateTime<Utc>, TaskId);

/// In-memory store state.
#[derive(Default)]
struct InMemoryStoreState {
    /// All task records, partitioned by process (single source of truth).
    partitions: HashMap<ProcessId, BTreeMap<TaskId, TaskRecord>>,

    /// Secondary index over non-null `bad_state_enter_time`, per process.
    stuck_index: HashMap<ProcessId, BTreeSet<StuckEntry>>,

    /// When set, every operation fails with `Unavailable`.
    outage: Option<String>,
}

impl InMemoryStoreState {
    fn check_available(&self) -> Result<(), StoreError> {
        match &self.outage {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Stored record, expired or not.
    fn stored(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.partitions
            .get(&key.process_id)
            .and_then(|partition| partition.get(&key.task_id))
    }

    fn visible(&self, key: &TaskKey, now: DateTime<Utc>) -> Option<&TaskRecord> {
        self.stored(key).filter(|record| record.is_visible(now))
    }

    /// Store `record` and keep the stuck index in step with its flag.
    fn write(&mut self, record: TaskRecord) {
        let process_id = record.key.process_id.clone();
        let task_id = record.key.task_id.clone();
        let previous_stamp = self
            .stored(&record.key)
            .and_then(|previous| previous.bad_state_enter_time);

        if previous_stamp != record.bad_state_enter_time {
            let index = self.stuck_index.entry(process_id.clone()).or_default();
            if let Some(stamp) = previous_stamp {
                index.remove(&(stamp, task_id.clone()));
            }
            if let Some(stamp) = record.bad_state_enter_time {
                index.insert((stamp, task_id.clone()));
            }
            if index.is_empty() {
                self.stuck_index.remove(&process_id);
            }
        }

        self.partitions
            .entry(process_id)
            .or_default()
            .insert(task_id, record);
    }

    /// Physically remove a record and its index entry.
    fn remove(&mut self, key: &TaskKey) {
        let Some(partition) = self.partitions.get_mut(&key.process_id) else {
            return;
        };
        let Some(record) = partition.remove(&key.task_id) else {
            return;
        };
        if partition.is_empty() {
            self.partitions.remove(&key.process_id);
        }

        if let Some(stamp) = record.bad_state_enter_time
            && let Some(index) = self.stuck_index.get_mut(&key.process_id)
        {
            index.remove(&(stamp, key.task_id.clone()));
            if index.is_empty() {
                self.stuck_index.remove(&key.process_id);
            }
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<TaskKey> = self
            .partitions
            .values()
            .flat_map(|partition| partition.values())
            .filter(|record| !record.is_visible(now))
            .map(|record| record.key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// In-memory task store.
///
/// Design:
/// - One mutex over all partitions: every single-record write is atomic and
///   every scan is a consistent snapshot.
/// - Expired records stay in memory until `purge_expired`, but no read path
///   returns them.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreError::Unavailable` until `end_outage`.
    pub async fn simulate_outage(&self, reason: impl Into<String>) {
        self.state.lock().await.outage = Some(reason.into());
    }

    pub async fn end_outage(&self) {
        self.state.lock().await.outage = None;
    }

    /// Number of stored records, expired ones included.
    pub async fn stored_len(&self) -> usize {
        let state = self.state.lock().await;
        state.partitions.values().map(BTreeMap::len).sum()
    }

    /// Task ids in a process's stuck index, oldest stamp first.
    pub async fn stuck_index(&self, process_id: &ProcessId) -> Vec<TaskId> {
        let state = self.state.lock().await;
        state
            .stuck_index
            .get(process_id)
            .map(|index| index.iter().map(|(_, task_id)| task_id.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(
        &self,
        key: &TaskKey,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.visible(key, now).cloned())
    }

    async fn put(
        &self,
        mut record: TaskRecord,
        condition: WriteCondition,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if !condition.holds(state.visible(&record.key, now)) {
            return Err(StoreError::Conflict(record.key));
        }

        // version は期限切れのレコードからも引き継ぐ（単調増加を保つ）
        record.version = state
            .stored(&record.key)
            .map_or(1, |previous| previous.version + 1);
        state.write(record.clone());
        Ok(record)
    }

    async fn mark_stuck(
        &self,
        key: &TaskKey,
        staleness_threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let Some(current) = state.visible(key, now) else {
            return Err(StoreError::Conflict(key.clone()));
        };
        if !current.needs_stuck_stamp(now, staleness_threshold) {
            return Err(StoreError::Conflict(key.clone()));
        }

        let mut stamped = current.clone();
        stamped.stamp_stuck(now);
        stamped.version += 1;
        state.write(stamped.clone());
        Ok(stamped)
    }

    async fn scan_process(
        &self,
        process_id: &ProcessId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .partitions
            .get(process_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|record| record.is_visible(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn oldest_stuck(
        &self,
        process_id: &ProcessId,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        state.check_available()?;

        let Some(index) = state.stuck_index.get(process_id) else {
            return Ok(None);
        };
        // 期限切れでまだ purge されていないエントリは飛ばす
        Ok(index
            .iter()
            .filter_map(|(_, task_id)| {
                let key = TaskKey::new(process_id.clone(), task_id.clone());
                state.visible(&key, now)
            })
            .find(|record| record.has_stuck_stamp())
            .cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        Ok(state.purge_expired(now))
    }
}
