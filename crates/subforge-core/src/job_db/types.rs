//! Types shared by the job database and the in-memory job store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::options::JobOptions;

/// Job identifier (UUID v4, simple hex form).
pub type JobId = String;

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Lifecycle state stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "done" => JobStatus::Done,
            "error" => JobStatus::Error,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }

    /// Legal lifecycle edges. `Running -> Queued` exists only for restart recovery.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Done)
                | (Running, Error)
                | (Running, Cancelled)
                | (Running, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure category recorded with an `error` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_VALIDATION")]
    Validation,
    #[serde(rename = "E_SOURCE_MISSING")]
    SourceMissing,
    #[serde(rename = "E_FRONTEND")]
    FrontEnd,
    #[serde(rename = "E_BACKEND")]
    Backend,
    #[serde(rename = "E_NO_SPEECH")]
    NoSpeech,
    #[serde(rename = "E_ORPHANED")]
    Orphaned,
    #[serde(rename = "E_WORKER_FAULT")]
    WorkerFault,
    #[serde(rename = "E_STORAGE")]
    Storage,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => "E_VALIDATION",
            ErrorCode::SourceMissing => "E_SOURCE_MISSING",
            ErrorCode::FrontEnd => "E_FRONTEND",
            ErrorCode::Backend => "E_BACKEND",
            ErrorCode::NoSpeech => "E_NO_SPEECH",
            ErrorCode::Orphaned => "E_ORPHANED",
            ErrorCode::WorkerFault => "E_WORKER_FAULT",
            ErrorCode::Storage => "E_STORAGE",
            ErrorCode::Internal => "E_INTERNAL",
        }
    }
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// Location of a finished subtitle file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub path: PathBuf,
    /// Suggested file name for downloads (`<upload stem>.srt`).
    pub download_name: String,
}

/// Staged upload a job transcribes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSource {
    pub path: PathBuf,
    pub original_name: String,
}

/// One line of a job's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    /// Unix milliseconds.
    pub ts: i64,
    pub message: String,
}

/// Full job state. The store's in-memory copy is authoritative; the database
/// holds the last flushed snapshot.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub heartbeat_at: Option<i64>,
    pub source: JobSource,
    pub options: JobOptions,
    /// Newest retained log lines, ascending by `seq`.
    pub log: Vec<LogEntry>,
    /// Last `seq` handed out; never decreases.
    pub log_seq: u64,
    pub error: Option<JobError>,
    pub output: Option<OutputRef>,
    pub cancel_requested: bool,
    /// Runner holding the job while it is running.
    pub owner: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId, source: JobSource, options: JobOptions, now: i64) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            heartbeat_at: None,
            source,
            options,
            log: Vec::new(),
            log_seq: 0,
            error: None,
            output: None,
            cancel_requested: false,
            owner: None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            finished_at: self.finished_at,
            original_name: self.source.original_name.clone(),
            error: self.error.clone(),
            output: self.output.clone(),
        }
    }
}

/// Summary view used by `status` listings and the cleanup sweeper.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: i64,
    pub finished_at: Option<i64>,
    pub original_name: String,
    pub error: Option<JobError>,
    pub output: Option<OutputRef>,
}
