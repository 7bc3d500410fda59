//! Orphan detection for running jobs.
//!
//! Workers touch a job's heartbeat as they make progress. The monitor scans
//! the `running` jobs this runner owns periodically and fails any whose heartbeat is older than
//! the configured retention with `E_ORPHANED`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job_db::unix_millis;
use crate::job_store::JobStore;

const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

pub struct HeartbeatMonitor {
    store: Arc<JobStore>,
    orphan_after: Duration,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Scans every tenth of `orphan_after`, but no more than once a second.
    pub fn new(store: Arc<JobStore>, orphan_after: Duration) -> Self {
        Self {
            store,
            orphan_after,
            interval: (orphan_after / 10).max(MIN_SCAN_INTERVAL),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fail every running job that has been silent longer than
    /// `orphan_after` as of `now` (unix ms). Returns how many were failed.
    pub async fn sweep_at(&self, now: i64) -> usize {
        let orphan_after_ms = i64::try_from(self.orphan_after.as_millis()).unwrap_or(i64::MAX);
        let mut failed = 0;
        for id in self.store.running_ids() {
            match self.store.fail_if_orphaned(&id, now, orphan_after_ms).await {
                Ok(true) => {
                    tracing::warn!(job_id = %id, "job orphaned: no heartbeat for over {:?}", self.orphan_after);
                    failed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %id, "orphan check failed: {e}"),
            }
        }
        failed
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(unix_millis()).await
    }

    /// Spawn the periodic scanner; it stops when `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!("heartbeat monitor started (every {:?})", self.interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let failed = self.sweep().await;
                        if failed > 0 {
                            tracing::info!("failed {} orphaned job(s)", failed);
                        }
                    }
                }
            }
            tracing::debug!("heartbeat monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::job_db::db::open_memory;
    use crate::job_db::{ErrorCode, JobSource, JobStatus};
    use crate::job_store::StoreLimits;
    use crate::options::JobOptions;

    async fn store_with_job() -> (Arc<JobStore>, String) {
        let store = JobStore::open(open_memory().await.unwrap(), StoreLimits::default())
            .await
            .unwrap();
        let source = JobSource {
            path: PathBuf::from("/tmp/talk.wav"),
            original_name: "talk.wav".into(),
        };
        let opts = JobOptions::build("en", "nova-2-general", Default::default()).unwrap();
        let id = store.create(source, opts).await.unwrap();
        (Arc::new(store), id)
    }

    #[tokio::test]
    async fn stale_running_job_is_orphaned() {
        let (store, id) = store_with_job().await;
        store.claim(&id).await.unwrap();
        store.touch_heartbeat_at(&id, 1_000).unwrap();

        let monitor = HeartbeatMonitor::new(Arc::clone(&store), Duration::from_secs(60));
        assert_eq!(monitor.sweep_at(1_000 + 60_000).await, 0);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Running);

        assert_eq!(monitor.sweep_at(1_000 + 60_001).await, 1);
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().code, ErrorCode::Orphaned);
        assert!(store.cancel_token(&id).unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn queued_jobs_are_never_orphaned() {
        let (store, id) = store_with_job().await;
        let monitor = HeartbeatMonitor::new(Arc::clone(&store), Duration::from_secs(60));
        assert_eq!(monitor.sweep_at(i64::MAX / 2).await, 0);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn scan_interval_scales_with_retention() {
        let (store, _id) = store_with_job().await;
        let monitor = HeartbeatMonitor::new(Arc::clone(&store), Duration::from_secs(600));
        assert_eq!(monitor.interval(), Duration::from_secs(60));
        let monitor = HeartbeatMonitor::new(store, Duration::from_secs(5));
        assert_eq!(monitor.interval(), MIN_SCAN_INTERVAL);
    }

    #[tokio::test]
    async fn spawned_monitor_stops_on_shutdown() {
        let (store, _id) = store_with_job().await;
        let monitor = Arc::new(
            HeartbeatMonitor::new(store, Duration::from_secs(60)).with_interval(Duration::from_millis(10)),
        );
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
