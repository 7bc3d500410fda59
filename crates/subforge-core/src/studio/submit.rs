//! Job submission: validate, stage the upload, create and enqueue.

use std::path::{Path, PathBuf};

use super::Studio;
use crate::job_db::{new_job_id, JobId, JobSource};
use crate::job_store::StoreError;
use crate::options::{JobOptions, RecognitionOptions, ValidationError};

const MIB: u64 = 1024 * 1024;

/// A new job as submitted by a client.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Local file to transcribe; copied into the data dir.
    pub file: PathBuf,
    /// Name shown to the user; defaults to the file name.
    pub original_name: Option<String>,
    pub language: String,
    pub model: String,
    pub options: RecognitionOptions,
}

impl SubmitRequest {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            original_name: None,
            language: "auto".to_string(),
            model: "nova-2-general".to_string(),
            options: RecognitionOptions::default(),
        }
    }
}

/// Why a submission was refused. No job exists afterwards.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("queue is full ({limit} jobs queued or running)")]
    QueueFull { limit: usize },
    #[error("could not store job: {0:#}")]
    Storage(anyhow::Error),
}

impl From<StoreError> for SubmitError {
    fn from(e: StoreError) -> Self {
        SubmitError::Storage(e.into())
    }
}

fn size_mb(len: u64) -> u64 {
    len.div_ceil(MIB)
}

fn display_name(file: &Path, original_name: Option<&str>) -> String {
    original_name
        .map(str::to_string)
        .or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

impl Studio {
    /// Validate a submission synchronously and queue the job.
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId, SubmitError> {
        let options = JobOptions::build(&req.language, &req.model, req.options)?;
        if !self.backend.is_configured() {
            return Err(ValidationError::BackendNotConfigured.into());
        }

        let meta = match std::fs::metadata(&req.file) {
            Ok(m) if m.is_file() => m,
            _ => return Err(ValidationError::SourceMissing(req.file).into()),
        };
        let size = size_mb(meta.len());
        if size > self.cfg.max_upload_mb {
            return Err(ValidationError::TooLarge {
                size_mb: size,
                max_mb: self.cfg.max_upload_mb,
            }
            .into());
        }
        self.frontend
            .probe(&req.file)
            .map_err(|e| ValidationError::UnsupportedSource(format!("{e:#}")))?;

        let active = self.store.active_count();
        if active >= self.cfg.max_queued_jobs {
            tracing::warn!("rejecting submission: {} active job(s)", active);
            return Err(SubmitError::QueueFull {
                limit: self.cfg.max_queued_jobs,
            });
        }

        let id = new_job_id();
        let original_name = display_name(&req.file, req.original_name.as_deref());
        let staged = self
            .layout
            .stage_upload(&id, &req.file, &original_name)
            .map_err(SubmitError::Storage)?;
        let source = JobSource {
            path: staged,
            original_name,
        };
        let summary = format!("queued: {} ({} / {})", source.original_name, options.language, options.model);
        if let Err(e) = self.store.create_with_id(id.clone(), source, options).await {
            let _ = self.layout.remove_job_artifacts(&id);
            return Err(e.into());
        }
        self.store.append_log(&id, summary)?;
        self.queue.push(id.clone());
        tracing::info!(job_id = %id, "job submitted");
        Ok(id)
    }
}
