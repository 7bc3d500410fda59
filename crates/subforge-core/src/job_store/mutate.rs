//! Per-job mutations: log, progress, heartbeat, and lifecycle transitions.

use serde::Serialize;

use super::{JobEntry, JobStore, StoreError, StoreLimits};
use crate::job_db::{
    unix_millis, ErrorCode, JobError, JobRecord, JobStatus, LogEntry, OutputRef, StatusSwap,
};
use crate::lease;

/// Lifecycle moves a worker can request after a claim.
#[derive(Debug, Clone)]
pub enum Transition {
    /// `running -> done`; progress becomes 100.
    Complete(OutputRef),
    /// `running -> error`.
    Fail(JobError),
    /// `queued|running -> cancelled`.
    Cancel,
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Complete(_) => JobStatus::Done,
            Transition::Fail(_) => JobStatus::Error,
            Transition::Cancel => JobStatus::Cancelled,
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was still queued and is now `cancelled`.
    Cancelled,
    /// The job is running; its worker stops at the next checkpoint.
    Requested,
    /// Nothing to do: the job already ended.
    AlreadyTerminal(JobStatus),
}

/// Append one sanitized line, trimming the in-memory window.
fn push_log(record: &mut JobRecord, limits: &StoreLimits, message: &str, now: i64) -> Option<u64> {
    let seq = record.log_seq + 1;
    push_log_at(record, limits, seq, message, now)
}

/// Append a line under a seq handed out elsewhere (by the database).
fn push_log_at(record: &mut JobRecord, limits: &StoreLimits, seq: u64, message: &str, now: i64) -> Option<u64> {
    let message = message.replace(['\r', '\n'], " ");
    let message = message.trim();
    if message.is_empty() {
        return None;
    }
    record.log_seq = record.log_seq.max(seq);
    record.log.push(LogEntry {
        seq,
        ts: now,
        message: message.to_string(),
    });
    let excess = record.log.len().saturating_sub(limits.log_max_lines);
    record.log.drain(..excess);
    record.updated_at = now;
    Some(seq)
}

fn swap<'a>(id: &'a str, from: JobStatus, to: JobStatus, message: &'a str) -> StatusSwap<'a> {
    StatusSwap {
        id,
        from,
        to,
        expected_owner: None,
        new_owner: None,
        error: None,
        message,
        known_seq: 0,
        now: unix_millis(),
    }
}

impl JobStore {
    /// Append a log line. Returns the assigned sequence number (0 if the
    /// message was blank and dropped).
    pub fn append_log(&self, id: &str, message: impl AsRef<str>) -> Result<u64, StoreError> {
        let entry = self.entry(id)?;
        let seq = {
            let mut record = entry.lock();
            push_log(&mut record, &self.limits, message.as_ref(), unix_millis())
        };
        if seq.is_some() {
            self.mark_dirty(id);
        }
        Ok(seq.unwrap_or(0))
    }

    /// Raise progress (clamped to `[0, 100]`, never lowered). Ignored once the
    /// job has ended. Returns the resulting progress.
    pub fn set_progress(&self, id: &str, pct: f64) -> Result<f64, StoreError> {
        let entry = self.entry(id)?;
        let mut record = entry.lock();
        if record.status.is_terminal() || !pct.is_finite() {
            return Ok(record.progress);
        }
        let pct = pct.clamp(0.0, 100.0);
        if pct > record.progress {
            record.progress = pct;
            record.updated_at = unix_millis();
            drop(record);
            self.mark_dirty(id);
            return Ok(pct);
        }
        Ok(record.progress)
    }

    /// Re-stamp liveness. Only running jobs have a heartbeat; returns false otherwise.
    pub fn touch_heartbeat(&self, id: &str) -> Result<bool, StoreError> {
        self.touch_heartbeat_at(id, unix_millis())
    }

    pub(crate) fn touch_heartbeat_at(&self, id: &str, now: i64) -> Result<bool, StoreError> {
        let entry = self.entry(id)?;
        let mut record = entry.lock();
        if record.status != JobStatus::Running {
            return Ok(false);
        }
        record.heartbeat_at = Some(now);
        drop(record);
        self.mark_dirty(id);
        Ok(true)
    }

    /// Atomically move a queued job to `running` under this store's lease,
    /// stamping the first heartbeat.
    ///
    /// The move is a compare-and-set on the database row, so exactly one of
    /// any number of concurrent callers, in this process or another, gets
    /// `Ok(true)`. The rest (and callers for cancelled or already-claimed
    /// jobs) get `Ok(false)`.
    pub async fn claim(&self, id: &str) -> Result<bool, StoreError> {
        let entry = self.entry(id)?;
        {
            let record = entry.lock();
            if record.status != JobStatus::Queued || record.cancel_requested {
                return Ok(false);
            }
        }
        let runner = self.runner_id();
        let claimed = self
            .swap_status(&entry, StatusSwap {
                new_owner: Some(runner),
                ..swap(id, JobStatus::Queued, JobStatus::Running, "started")
            })
            .await?;
        if !claimed {
            tracing::debug!(job_id = %id, "claim lost to the database state");
            let flagged = {
                let record = entry.lock();
                record.status == JobStatus::Queued && record.cancel_requested
            };
            if flagged {
                self.cancel_queued(&entry).await?;
            }
        }
        Ok(claimed)
    }

    /// Flush, then apply `change` to the row as a compare-and-set and mirror
    /// it in memory. When the row no longer matches, memory is refreshed from
    /// it instead and `false` is returned.
    async fn swap_status(&self, entry: &JobEntry, mut change: StatusSwap<'_>) -> Result<bool, StoreError> {
        let mut persisted = entry.persisted_seq.lock().await;
        self.flush_locked(change.id, entry, &mut persisted).await?;
        change.known_seq = entry.lock().log_seq;
        let Some(seq) = self.db.swap_status(&change).await? else {
            drop(persisted);
            self.refresh(entry).await?;
            return Ok(false);
        };
        {
            let mut record = entry.lock();
            let now = change.now;
            record.status = change.to;
            record.owner = change.new_owner.map(str::to_string);
            match change.to {
                JobStatus::Running => {
                    record.started_at = Some(now);
                    record.heartbeat_at = Some(now);
                }
                JobStatus::Queued => record.heartbeat_at = None,
                _ => {}
            }
            if change.to.is_terminal() {
                record.finished_at = Some(now);
            }
            if change.to == JobStatus::Cancelled {
                record.cancel_requested = true;
            }
            if let Some(error) = change.error {
                record.error = Some(error.clone());
            }
            push_log_at(&mut record, &self.limits, seq, change.message, now);
        }
        if change.to == JobStatus::Cancelled {
            entry.cancel.cancel();
        }
        *persisted = (*persisted).max(seq);
        Ok(true)
    }

    async fn cancel_queued(&self, entry: &JobEntry) -> Result<bool, StoreError> {
        let id = entry.lock().id.clone();
        self.swap_status(
            entry,
            swap(&id, JobStatus::Queued, JobStatus::Cancelled, "cancelled before start"),
        )
        .await
    }

    /// Release a running job whose owner no longer holds its lease: back to
    /// `queued`, or `cancelled` if a cancel was requested.
    ///
    /// Returns `None` while the owner is alive (or when this store is the
    /// owner). Otherwise returns the job's status after the attempt, which
    /// may be one another runner already moved it to.
    pub async fn release_abandoned(&self, id: &str) -> Result<Option<JobStatus>, StoreError> {
        let entry = self.entry(id)?;
        self.refresh(&entry).await?;
        let (owner, flagged) = {
            let record = entry.lock();
            if record.status != JobStatus::Running {
                return Ok(Some(record.status));
            }
            if self.owns(&record) {
                return Ok(None);
            }
            (record.owner.clone(), record.cancel_requested)
        };
        if let Some(owner) = owner.as_deref() {
            if lease::is_held(self.db.lease_dir(), owner) {
                return Ok(None);
            }
        }
        let (to, message) = if flagged {
            (JobStatus::Cancelled, "cancelled after restart")
        } else {
            (JobStatus::Queued, "requeued after restart")
        };
        self.swap_status(&entry, StatusSwap {
            expected_owner: Some(owner.as_deref()),
            ..swap(id, JobStatus::Running, to, message)
        })
        .await?;
        let status = entry.lock().status;
        Ok(Some(status))
    }

    /// Apply a lifecycle transition and persist it before returning.
    ///
    /// A completion that races with a cancel request becomes a cancellation;
    /// the returned status is the one actually applied.
    pub async fn transition(&self, id: &str, transition: Transition) -> Result<JobStatus, StoreError> {
        let entry = self.entry(id)?;
        let target;
        {
            let mut record = entry.lock();
            let transition = match transition {
                Transition::Complete(_) if record.cancel_requested => Transition::Cancel,
                other => other,
            };
            target = transition.target();
            let from = record.status;
            if !from.can_transition_to(target) {
                return Err(StoreError::IllegalTransition { from, to: target });
            }
            let now = unix_millis();
            let line = match transition {
                Transition::Complete(output) => {
                    record.progress = 100.0;
                    let line = format!("done: {}", output.download_name);
                    record.output = Some(output);
                    line
                }
                Transition::Fail(error) => {
                    let line = format!("error [{}]: {}", error.code.as_str(), error.message);
                    record.error = Some(error);
                    line
                }
                Transition::Cancel => {
                    record.cancel_requested = true;
                    entry.cancel.cancel();
                    "cancelled".to_string()
                }
            };
            record.status = target;
            if target.is_terminal() {
                record.finished_at = Some(now);
            }
            push_log(&mut record, &self.limits, &line, now);
        }
        self.mark_dirty(id);
        self.flush(id).await?;
        Ok(target)
    }

    /// Request cancellation.
    ///
    /// A queued job is cancelled on the spot. A job running under this store
    /// gets its flag and token set, and its worker finishes the transition at
    /// the next checkpoint. A job running under another runner only gets the
    /// durable flag: that runner picks it up and logs the request.
    pub async fn request_cancel(&self, id: &str) -> Result<CancelOutcome, StoreError> {
        let entry = self.entry(id)?;
        let (status, owned) = {
            let record = entry.lock();
            (record.status, self.owns(&record))
        };
        if status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(status));
        }
        if owned {
            {
                let mut record = entry.lock();
                if record.status.is_terminal() {
                    return Ok(CancelOutcome::AlreadyTerminal(record.status));
                }
                if record.cancel_requested {
                    return Ok(CancelOutcome::Requested);
                }
                record.cancel_requested = true;
                push_log(&mut record, &self.limits, "cancel requested", unix_millis());
            }
            entry.cancel.cancel();
            self.mark_dirty(id);
            self.flush(id).await?;
            return Ok(CancelOutcome::Requested);
        }
        if status == JobStatus::Queued && self.cancel_queued(&entry).await? {
            return Ok(CancelOutcome::Cancelled);
        }

        match self.db.flag_cancel(id).await? {
            None => Err(StoreError::NotFound(id.to_string())),
            Some(status) if status.is_terminal() => {
                self.refresh(&entry).await?;
                Ok(CancelOutcome::AlreadyTerminal(status))
            }
            Some(_) => {
                entry.lock().cancel_requested = true;
                entry.cancel.cancel();
                Ok(CancelOutcome::Requested)
            }
        }
    }

    /// Fail a running job whose heartbeat is older than `orphan_after_ms`.
    ///
    /// The staleness check and the transition happen under the job's lock,
    /// so a heartbeat that lands first keeps the job alive. The job's cancel
    /// token is also set so a stuck-but-alive worker stops dispatching. Jobs
    /// owned by another runner are left to that runner.
    pub async fn fail_if_orphaned(&self, id: &str, now: i64, orphan_after_ms: i64) -> Result<bool, StoreError> {
        let entry = self.entry(id)?;
        {
            let mut record = entry.lock();
            if !self.owns(&record) {
                return Ok(false);
            }
            let last = record
                .heartbeat_at
                .or(record.started_at)
                .unwrap_or(record.updated_at);
            let silent_for = now - last;
            if silent_for <= orphan_after_ms {
                return Ok(false);
            }
            let error = JobError::new(
                ErrorCode::Orphaned,
                format!("no heartbeat for {}s; worker presumed dead", silent_for / 1000),
            );
            let line = format!("error [{}]: {}", error.code.as_str(), error.message);
            record.status = JobStatus::Error;
            record.error = Some(error);
            record.finished_at = Some(now);
            push_log(&mut record, &self.limits, &line, now);
        }
        entry.cancel.cancel();
        self.mark_dirty(id);
        self.flush(id).await?;
        Ok(true)
    }
}
