//! Retention sweeper: removes finished jobs and their files once they age out.
//!
//! `done` jobs are kept for `done_retention_secs` after they finish; `error`
//! and `cancelled` jobs for `error_retention_secs`. Queued and running jobs
//! are never touched.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CleanupConfig;
use crate::job_db::{unix_millis, JobStatus, JobSummary};
use crate::job_store::JobStore;
use crate::storage::StorageLayout;

pub struct CleanupSweeper {
    store: Arc<JobStore>,
    layout: StorageLayout,
    done_retention: Duration,
    error_retention: Duration,
}

impl CleanupSweeper {
    pub fn new(
        store: Arc<JobStore>,
        layout: StorageLayout,
        done_retention: Duration,
        error_retention: Duration,
    ) -> Self {
        Self {
            store,
            layout,
            done_retention,
            error_retention,
        }
    }

    pub fn from_config(store: Arc<JobStore>, layout: StorageLayout, cfg: &CleanupConfig) -> Self {
        Self::new(
            store,
            layout,
            Duration::from_secs(cfg.done_retention_secs),
            Duration::from_secs(cfg.error_retention_secs),
        )
    }

    fn expired(&self, job: &JobSummary, now: i64) -> bool {
        let retention = match job.status {
            JobStatus::Done => self.done_retention,
            JobStatus::Error | JobStatus::Cancelled => self.error_retention,
            JobStatus::Queued | JobStatus::Running => return false,
        };
        let Some(finished_at) = job.finished_at else {
            return false;
        };
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(finished_at) > retention_ms
    }

    /// Remove every terminal job past its retention as of `now` (unix ms).
    /// Files go first, then the record. Returns how many jobs were removed.
    pub async fn sweep_at(&self, now: i64) -> Result<usize> {
        let mut removed = 0;
        for job in self.store.list() {
            if !self.expired(&job, now) {
                continue;
            }
            if let Err(e) = self.layout.remove_job_artifacts(&job.id) {
                tracing::warn!(job_id = %job.id, "could not delete job files: {e:#}");
                continue;
            }
            if self.store.remove(&job.id).await?.is_some() {
                tracing::debug!(job_id = %job.id, status = %job.status, "expired job removed");
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("cleanup removed {} expired job(s)", removed);
        }
        Ok(removed)
    }

    pub async fn sweep(&self) -> Result<usize> {
        self.sweep_at(unix_millis()).await
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::warn!("cleanup sweep failed: {e:#}");
                        }
                    }
                }
            }
            tracing::debug!("cleanup sweeper stopped");
        })
    }
}
