//! Coalesced persistence of dirty jobs.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{JobEntry, JobStore, StoreError};
use crate::job_db::{JobId, JobRecord, JobSnapshot};

fn without_log(record: &JobRecord) -> JobRecord {
    JobRecord {
        id: record.id.clone(),
        status: record.status,
        progress: record.progress,
        created_at: record.created_at,
        updated_at: record.updated_at,
        started_at: record.started_at,
        finished_at: record.finished_at,
        heartbeat_at: record.heartbeat_at,
        source: record.source.clone(),
        options: record.options.clone(),
        log: Vec::new(),
        log_seq: record.log_seq,
        error: record.error.clone(),
        output: record.output.clone(),
        cancel_requested: record.cancel_requested,
        owner: record.owner.clone(),
    }
}

impl JobStore {
    /// Write the current state of one job.
    ///
    /// Flushes of the same job are serialized and each one snapshots the
    /// record only after taking the flush lock, so the last write always
    /// carries the newest state.
    pub async fn flush(&self, id: &str) -> Result<(), StoreError> {
        let entry = self.entry(id)?;
        let mut persisted = entry.persisted_seq.lock().await;
        self.flush_locked(id, &entry, &mut persisted).await
    }

    /// Flush with the entry's flush lock already held.
    pub(super) async fn flush_locked(&self, id: &str, entry: &JobEntry, persisted: &mut u64) -> Result<(), StoreError> {
        if entry.removed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        let snapshot = {
            let record = entry.lock();
            JobSnapshot {
                new_logs: record
                    .log
                    .iter()
                    .filter(|line| line.seq > *persisted)
                    .cloned()
                    .collect(),
                record: without_log(&record),
                writer: self.runner_id().to_string(),
            }
        };
        if let Err(e) = self
            .db
            .save_snapshot(&snapshot, self.limits.persisted_log_max_lines as u64)
            .await
        {
            self.mark_dirty(id);
            return Err(StoreError::Persist(e));
        }
        *persisted = snapshot.record.log_seq;
        Ok(())
    }

    /// Re-read one job's row and merge it into memory. Used after a
    /// compare-and-set lost to another runner.
    pub(super) async fn refresh(&self, entry: &JobEntry) -> Result<(), StoreError> {
        let id = entry.lock().id.clone();
        let Some(row) = self.db.load_job(&id).await? else {
            return Ok(());
        };
        let mut record = entry.lock();
        record.status = row.status;
        record.owner = row.owner;
        record.started_at = row.started_at;
        record.finished_at = row.finished_at;
        record.heartbeat_at = row.heartbeat_at;
        record.error = row.error;
        record.output = row.output;
        record.progress = record.progress.max(row.progress);
        record.updated_at = record.updated_at.max(row.updated_at);
        record.log_seq = record.log_seq.max(row.log_seq);
        record.cancel_requested |= row.cancel_requested;
        if record.cancel_requested {
            entry.cancel.cancel();
        }
        Ok(())
    }

    /// Flush every dirty job. Returns how many were written.
    pub async fn flush_dirty(&self) -> Result<usize, StoreError> {
        let ids: Vec<JobId> = self
            .dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        let mut written = 0;
        let mut first_err = None;
        for id in ids {
            match self.flush(&id).await {
                Ok(()) => written += 1,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(job_id = %id, "metadata flush failed: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Apply cancel flags written to the database by another process.
    pub async fn sync_external_cancels(&self) -> Result<usize, StoreError> {
        let flagged = self.db.cancel_requested_ids().await?;
        let mut applied = 0;
        for id in flagged {
            let Ok(entry) = self.entry(&id) else {
                continue;
            };
            let pending = {
                let record = entry.lock();
                !record.cancel_requested && !record.status.is_terminal()
            };
            if pending {
                tracing::info!(job_id = %id, "cancel requested externally");
                self.request_cancel(&id).await?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Flush dirty jobs every `interval` until `shutdown` fires, then flush once more.
    pub async fn run_flusher(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_external_cancels().await {
                        tracing::warn!("cancel sync failed: {e}");
                    }
                    if let Err(e) = self.flush_dirty().await {
                        tracing::warn!("periodic flush failed: {e}");
                    }
                }
            }
        }
        if let Err(e) = self.flush_dirty().await {
            tracing::error!("final flush failed: {e}");
        }
        tracing::debug!("job flusher stopped");
    }
}
