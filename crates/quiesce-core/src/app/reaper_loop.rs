//! ReaperLoop - 期限切れレコードの回収
//!
//! 期限切れの判定自体はストアの読み出し側で済んでいる（`expires_at <= now` は見えない）。
//! このループはメモリを取り戻すために物理削除するだけで、書き込み経路とは協調しない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ports::{Clock, TaskStore};

/// ReaperLoop は `interval` ごとに `TaskStore::purge_expired` を呼ぶ
pub struct ReaperLoop {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

/// Reaper handle.
/// - `shutdown_tx` を drop するとループが止まる
/// - `shutdown_and_join()` で終了を待てる
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Purge once. Store errors are logged and swallowed; the next tick retries.
    pub async fn run_once(&self) -> usize {
        match self.store.purge_expired(self.clock.now()).await {
            Ok(0) => {
                debug!("reaper found nothing to purge");
                0
            }
            Ok(purged) => {
                info!(purged, "purged expired task records");
                purged
            }
            Err(err) => {
                warn!(error = %err, "reaper pass failed");
                0
            }
        }
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // 最初の tick は即座に返るので読み捨てる
            ticker.tick().await;

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender が drop されたら止まる
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }

                self.run_once().await;
            }
            debug!("reaper loop stopped");
        });

        ReaperHandle { shutdown_tx, join }
    }
}

impl ReaperHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessId, TaskId, TaskKey, TaskRecord, deadline_after};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedClock, WriteCondition};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn seed(store: &InMemoryTaskStore, task: &str, ttl: Duration) {
        let key = TaskKey::new(ProcessId::parse("p").unwrap(), TaskId::parse(task).unwrap());
        let record = TaskRecord::new_pending(key, t0(), deadline_after(t0(), ttl));
        store
            .put(record, WriteCondition::NotExists, t0())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_once_purges_only_expired_records() {
        let store = InMemoryTaskStore::new();
        seed(&store, "short", Duration::from_secs(60)).await;
        seed(&store, "long", Duration::from_secs(3600)).await;

        let clock = FixedClock::new(t0());
        let reaper = ReaperLoop::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(1),
        );

        assert_eq!(reaper.run_once().await, 0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(reaper.run_once().await, 1);
        assert_eq!(store.stored_len().await, 1);
    }

    #[tokio::test]
    async fn outage_is_swallowed() {
        let store = InMemoryTaskStore::new();
        store.simulate_outage("down").await;
        let reaper = ReaperLoop::new(
            Arc::new(store),
            Arc::new(FixedClock::new(t0())),
            Duration::from_secs(1),
        );
        assert_eq!(reaper.run_once().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_purges_on_each_tick_and_stops_on_shutdown() {
        let store = InMemoryTaskStore::new();
        seed(&store, "a", Duration::from_secs(60)).await;

        let clock = FixedClock::new(deadline_after(t0(), Duration::from_secs(120)));
        let handle = ReaperLoop::new(
            Arc::new(store.clone()),
            Arc::new(clock),
            Duration::from_secs(30),
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.stored_len().await, 0);

        handle.shutdown_and_join().await;
    }
}
