//! Incremental status reads.

use serde::Serialize;

use super::JobStore;
use crate::job_db::{JobError, JobId, JobStatus, LogEntry, OutputRef};

/// One poll result. `logs` holds only lines newer than the caller's cursor;
/// `next_seq` is the cursor to send next time.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    pub next_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<OutputRef>,
    pub cancel_requested: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobStore {
    /// Pure read: lines with `seq > since_seq`, and the next cursor.
    ///
    /// Lines already trimmed from memory are skipped; the cursor still
    /// advances monotonically.
    pub fn status(&self, id: &str, since_seq: u64) -> Option<StatusView> {
        let entry = self.entry(id).ok()?;
        let record = entry.lock();
        let logs: Vec<LogEntry> = record
            .log
            .iter()
            .filter(|line| line.seq > since_seq)
            .cloned()
            .collect();
        let next_seq = logs.last().map_or(since_seq, |line| line.seq.max(since_seq));
        Some(StatusView {
            job_id: record.id.clone(),
            status: record.status,
            progress: record.progress,
            logs,
            next_seq,
            error: record.error.clone(),
            download: record.output.clone(),
            cancel_requested: record.cancel_requested,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
