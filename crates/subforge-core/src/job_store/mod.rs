//! Authoritative in-memory job registry backed by the job database.
//!
//! Readers always see the in-memory state. Log lines, progress and
//! heartbeats only mark a job dirty and reach SQLite on the next flusher
//! tick; status transitions flush before returning. Each job has its own
//! record mutex (one writer at a time per job) and its own flush lock (one
//! snapshot write at a time per job).
//!
//! Several processes may open the same database. Each store holds a runner
//! lease, and a job is claimed by a compare-and-set on its row that records
//! the lease id as owner. Only the owner drives a running job; other stores
//! may only set its durable cancel flag.

mod flush;
mod mutate;
mod status;


pub use mutate::{CancelOutcome, Transition};
pub use status::StatusView;

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::config::StoreConfig;
use crate::control::CancelToken;
use crate::job_db::{
    new_job_id, unix_millis, JobDb, JobId, JobRecord, JobSource, JobStatus, JobSummary,
};
use crate::lease::RunnerLease;
use crate::options::JobOptions;

/// Failure of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// Log retention caps.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub log_max_lines: usize,
    pub persisted_log_max_lines: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        StoreLimits::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for StoreLimits {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            log_max_lines: cfg.log_max_lines.max(1),
            persisted_log_max_lines: cfg.persisted_log_max_lines.max(1),
        }
    }
}

pub(crate) struct JobEntry {
    /// Insertion order; FIFO tie-break for jobs created in the same millisecond.
    order: u64,
    record: Mutex<JobRecord>,
    cancel: CancelToken,
    /// Highest log `seq` written to the database. Held across a flush.
    persisted_seq: tokio::sync::Mutex<u64>,
    removed: AtomicBool,
}

impl JobEntry {
    fn lock(&self) -> MutexGuard<'_, JobRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct JobStore {
    db: JobDb,
    entries: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    dirty: Mutex<HashSet<JobId>>,
    limits: StoreLimits,
    next_order: AtomicU64,
    lease: RunnerLease,
}

impl JobStore {
    /// Take a runner lease and load every persisted job into memory.
    pub async fn open(db: JobDb, limits: StoreLimits) -> Result<Self> {
        let lease = RunnerLease::acquire(db.lease_dir())?;
        let records = db.load_jobs().await?;
        let store = Self {
            db,
            entries: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            limits,
            next_order: AtomicU64::new(0),
            lease,
        };
        let count = records.len();
        for mut record in records {
            let excess = record.log.len().saturating_sub(limits.log_max_lines);
            record.log.drain(..excess);
            let persisted = record.log_seq;
            store.insert(record, persisted);
        }
        tracing::debug!(jobs = count, runner = %store.runner_id(), "job store loaded");
        Ok(store)
    }

    pub fn db(&self) -> &JobDb {
        &self.db
    }

    /// Lease id this store claims jobs under.
    pub fn runner_id(&self) -> &str {
        self.lease.id()
    }

    /// True if `record` is running under this store's lease.
    fn owns(&self, record: &JobRecord) -> bool {
        record.status == JobStatus::Running && record.owner.as_deref() == Some(self.runner_id())
    }

    /// Create a queued job and persist it before returning its id.
    pub async fn create(&self, source: JobSource, options: JobOptions) -> Result<JobId, StoreError> {
        self.create_with_id(new_job_id(), source, options).await
    }

    /// Like `create`, for callers that allocated the id up front (uploads are
    /// staged under it before the job exists).
    pub async fn create_with_id(&self, id: JobId, source: JobSource, options: JobOptions) -> Result<JobId, StoreError> {
        let record = JobRecord::new(id.clone(), source, options, unix_millis());
        self.insert(record, 0);
        self.mark_dirty(&id);
        self.flush(&id).await?;
        Ok(id)
    }

    fn insert(&self, record: JobRecord, persisted_seq: u64) {
        let id = record.id.clone();
        let cancel = if record.cancel_requested {
            CancelToken::cancelled()
        } else {
            CancelToken::new()
        };
        let entry = Arc::new(JobEntry {
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
            record: Mutex::new(record),
            cancel,
            persisted_seq: tokio::sync::Mutex::new(persisted_seq),
            removed: AtomicBool::new(false),
        });
        self.entries_mut().insert(id, entry);
    }

    pub(crate) fn entry(&self, id: &str) -> Result<Arc<JobEntry>, StoreError> {
        self.entries_read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn entries_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, Arc<JobEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, Arc<JobEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn sorted_entries(&self) -> Vec<Arc<JobEntry>> {
        let mut entries: Vec<_> = self.entries_read().values().cloned().collect();
        entries.sort_by_key(|e| e.order);
        entries
    }

    fn mark_dirty(&self, id: &str) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries_read().contains_key(id)
    }

    /// Snapshot of one job.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        let entry = self.entry(id).ok()?;
        let record = entry.lock().clone();
        Some(record)
    }

    pub fn cancel_token(&self, id: &str) -> Option<CancelToken> {
        self.entry(id).ok().map(|e| e.cancel.clone())
    }

    /// All jobs in submission order.
    pub fn list(&self) -> Vec<JobSummary> {
        self.sorted_entries()
            .iter()
            .map(|e| e.lock().summary())
            .collect()
    }

    /// Jobs whose status is `queued` or `running`, oldest first.
    pub fn list_resumable(&self) -> Vec<JobRecord> {
        self.sorted_entries()
            .iter()
            .filter_map(|e| {
                let record = e.lock();
                matches!(record.status, JobStatus::Queued | JobStatus::Running).then(|| record.clone())
            })
            .collect()
    }

    /// Ids of jobs currently `running`.
    pub fn running_ids(&self) -> Vec<JobId> {
        self.sorted_entries()
            .iter()
            .filter_map(|e| {
                let record = e.lock();
                (record.status == JobStatus::Running).then(|| record.id.clone())
            })
            .collect()
    }

    /// Number of jobs still waiting or executing.
    pub fn active_count(&self) -> usize {
        self.entries_read()
            .values()
            .filter(|e| !e.lock().status.is_terminal())
            .count()
    }

    /// Drop a job from memory and from the database.
    pub async fn remove(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let removed = self.entries_mut().remove(id);
        let Some(entry) = removed else {
            return Ok(None);
        };
        // Wait out an in-progress flush so it cannot re-insert the row.
        let _flush = entry.persisted_seq.lock().await;
        entry.removed.store(true, Ordering::Release);
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        self.db.remove_job(id).await?;
        let record = entry.lock().clone();
        Ok(Some(record))
    }
}
