//! Execute one claimed job end to end.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendError, TranscribeRequest, Transcriber};
use crate::config::{SegmentationConfig, StudioConfig};
use crate::control::CancelToken;
use crate::dispatcher::{dispatch_segments, DispatchError, DispatchLimits, DispatchObserver};
use crate::frontend::{AudioFrontEnd, AudioSegment, SpeechMap, SpeechSpan};
use crate::job_db::{ErrorCode, JobError, JobId, OutputRef};
use crate::job_store::{JobStore, StoreError};
use crate::options::Language;
use crate::retry::RetryPolicy;
use crate::segmenter::{empty_retry_window, plan_segments, SegmentPlanParams};
use crate::storage::{download_name, write_atomic, StorageLayout};
use crate::subtitle::{assemble, srt, AssemblyOptions, SegmentTranscript};

/// Progress after speech detection.
const PROGRESS_DETECTED: f64 = 8.0;
/// Progress once segments are extracted; dispatch fills the next 80 points.
const PROGRESS_EXTRACTED: f64 = 14.0;
const PROGRESS_DISPATCH_SPAN: f64 = 80.0;

/// How a job that did not fail ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done(OutputRef),
    Cancelled,
}

/// A job-level failure with its public error code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<JobFailure> for JobError {
    fn from(f: JobFailure) -> Self {
        JobError::new(f.code, f.message)
    }
}

impl From<StoreError> for JobFailure {
    fn from(e: StoreError) -> Self {
        JobFailure::new(ErrorCode::Storage, e.to_string())
    }
}

/// Service-wide knobs the runner needs.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub segmentation: SegmentationConfig,
}

impl RunnerSettings {
    pub fn from_config(cfg: &StudioConfig) -> Self {
        Self {
            concurrency: cfg.concurrency,
            retry: cfg.retry_policy(),
            segmentation: cfg.segmentation.clone(),
        }
    }
}

/// Reports dispatch progress into the job's log, progress and heartbeat.
struct JobObserver {
    store: Arc<JobStore>,
    id: JobId,
    /// Off for the empty-segment retry pass, which only keeps the heartbeat.
    report_progress: bool,
}

impl DispatchObserver for JobObserver {
    fn segment_retrying(&self, index: usize, attempt: u32, error: &BackendError, delay: Duration) {
        tracing::warn!(job_id = %self.id, segment = index, attempt, "backend call failed: {error}");
        let _ = self.store.append_log(
            &self.id,
            format!(
                "segment {} attempt {} failed: {}; retrying in {:.1}s",
                index + 1,
                attempt,
                error,
                delay.as_secs_f64()
            ),
        );
    }

    fn segment_finished(&self, done: usize, total: usize) {
        if !self.report_progress {
            let _ = self.store.touch_heartbeat(&self.id);
            return;
        }
        let pct = PROGRESS_EXTRACTED + PROGRESS_DISPATCH_SPAN * done as f64 / total.max(1) as f64;
        let _ = self.store.set_progress(&self.id, pct);
        let _ = self.store.touch_heartbeat(&self.id);
        let _ = self.store.append_log(&self.id, format!("segment {done}/{total} transcribed"));
    }
}

/// Runs the transcription pipeline for claimed jobs.
pub struct JobRunner {
    store: Arc<JobStore>,
    backend: Arc<dyn Transcriber>,
    frontend: Arc<dyn AudioFrontEnd>,
    layout: StorageLayout,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        backend: Arc<dyn Transcriber>,
        frontend: Arc<dyn AudioFrontEnd>,
        layout: StorageLayout,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            backend,
            frontend,
            layout,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Execute a job the caller has already claimed. Does not apply the
    /// terminal transition; the caller maps the result onto one.
    pub async fn run_job(&self, id: &JobId) -> Result<JobOutcome, JobFailure> {
        let store = &self.store;
        let record = store
            .get(id)
            .ok_or_else(|| JobFailure::new(ErrorCode::Internal, format!("job {id} vanished from the store")))?;
        let cancel = store.cancel_token(id).unwrap_or_default();
        let opts = record.options.clone();

        store.set_progress(id, 1.0)?;
        store.append_log(id, format!("language={} model={}", opts.language, opts.model))?;
        if cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let source = record.source.path.clone();
        if !source.exists() {
            return Err(JobFailure::new(
                ErrorCode::SourceMissing,
                format!("source file {} is missing", source.display()),
            ));
        }

        let vad = opts.recognition.vad.resolve();
        store.append_log(
            id,
            format!(
                "detecting speech (threshold {:.2}, min silence {} ms, min speech {} ms, pad {} ms)",
                vad.threshold, vad.min_silence_ms, vad.min_speech_ms, vad.speech_pad_ms
            ),
        )?;
        let map = self
            .on_frontend(&source, move |fe, path| fe.detect_speech(path, &vad))
            .await?;
        store.set_progress(id, PROGRESS_DETECTED)?;
        store.touch_heartbeat(id)?;
        store.append_log(id, describe_speech(&map))?;

        let params = SegmentPlanParams::new(&self.settings.segmentation, &opts.recognition.segmentation);
        let plan = plan_segments(&map, &params);
        if plan.is_empty() {
            return Err(JobFailure::new(ErrorCode::NoSpeech, "source contains no audio"));
        }
        store.append_log(
            id,
            format!(
                "planned {} segment(s) (split {}, merged {}, dropped {})",
                plan.len(),
                plan.split,
                plan.merged,
                plan.dropped
            ),
        )?;

        let spans: Vec<SpeechSpan> = plan.spans.clone();
        let clips = self
            .on_frontend(&source, move |fe, path| fe.extract(path, &spans))
            .await?;
        check_clip_count(clips.len(), plan.len())?;
        let segments: Vec<AudioSegment> = plan
            .spans
            .iter()
            .zip(clips)
            .enumerate()
            .map(|(index, (span, audio))| AudioSegment {
                index,
                start: span.start,
                end: span.end,
                audio,
            })
            .collect();
        store.set_progress(id, PROGRESS_EXTRACTED)?;
        store.touch_heartbeat(id)?;
        if cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        store.append_log(
            id,
            format!(
                "transcribing {} segment(s) with {} (up to {} at once)",
                segments.len(),
                self.backend.name(),
                self.settings.concurrency
            ),
        )?;
        let observer = Arc::new(JobObserver {
            store: Arc::clone(store),
            id: id.clone(),
            report_progress: true,
        });
        let request = TranscribeRequest::from(&opts);
        let transcripts = match dispatch_segments(
            Arc::clone(&self.backend),
            segments,
            Arc::new(request.clone()),
            &self.dispatch_limits(),
            &cancel,
            observer,
        )
        .await
        {
            Ok(t) => t,
            Err(DispatchError::Cancelled { completed }) => {
                store.append_log(id, format!("stopped after {completed} transcribed segment(s)"))?;
                return Ok(JobOutcome::Cancelled);
            }
            Err(e @ DispatchError::SegmentFailed { .. }) => {
                return Err(JobFailure::new(ErrorCode::Backend, e.to_string()));
            }
            Err(e @ DispatchError::Internal(_)) => {
                return Err(JobFailure::new(ErrorCode::WorkerFault, e.to_string()));
            }
        };

        let transcripts = self
            .retry_empty_segments(id, &source, map.total_seconds, &request, transcripts, &cancel)
            .await?;
        if cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        store.touch_heartbeat(id)?;
        store.append_log(id, "assembling subtitles")?;
        let cues = assemble(&transcripts, &AssemblyOptions::from(&opts));
        if cues.is_empty() {
            return Err(JobFailure::new(
                ErrorCode::NoSpeech,
                "backend returned no speech for any segment",
            ));
        }
        if cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let out_path = self.layout.output_path(id);
        write_atomic(&out_path, srt::render(&cues).as_bytes())
            .map_err(|e| JobFailure::new(ErrorCode::Storage, format!("{e:#}")))?;
        store.append_log(id, format!("wrote {} cue(s)", cues.len()))?;
        tracing::info!("job {} completed: {}", id, out_path.display());
        Ok(JobOutcome::Done(OutputRef {
            path: out_path,
            download_name: download_name(&record.source.original_name),
        }))
    }

    fn dispatch_limits(&self) -> DispatchLimits {
        DispatchLimits {
            concurrency: self.settings.concurrency,
            retry: self.settings.retry,
        }
    }

    /// Give segments that came back empty one more try: a padded window,
    /// with the language left to the backend. A failed retry keeps the
    /// segment silent; the job's outcome rests on the first pass.
    async fn retry_empty_segments(
        &self,
        id: &JobId,
        source: &Path,
        total_seconds: f64,
        request: &TranscribeRequest,
        mut transcripts: Vec<SegmentTranscript>,
        cancel: &CancelToken,
    ) -> Result<Vec<SegmentTranscript>, JobFailure> {
        let empty: Vec<usize> = transcripts
            .iter()
            .enumerate()
            .filter(|(_, t)| t.text.trim().is_empty())
            .map(|(pos, _)| pos)
            .collect();
        if empty.is_empty() || cancel.is_cancelled() {
            return Ok(transcripts);
        }
        self.store.append_log(
            id,
            format!("retrying {} empty segment(s) with a wider window", empty.len()),
        )?;

        let windows: Vec<SpeechSpan> = empty
            .iter()
            .map(|&pos| {
                let t = &transcripts[pos];
                empty_retry_window(SpeechSpan::new(t.start, t.end), total_seconds)
            })
            .collect();
        let count = windows.len();
        let clips = self
            .on_frontend(source, move |fe, path| fe.extract(path, &windows))
            .await?;
        check_clip_count(clips.len(), count)?;
        let segments: Vec<AudioSegment> = empty
            .iter()
            .zip(clips)
            .map(|(&pos, audio)| {
                let t = &transcripts[pos];
                AudioSegment {
                    index: t.index,
                    start: t.start,
                    end: t.end,
                    audio,
                }
            })
            .collect();

        let mut retry_request = request.clone();
        retry_request.language = Language::Auto;
        let observer = Arc::new(JobObserver {
            store: Arc::clone(&self.store),
            id: id.clone(),
            report_progress: false,
        });
        match dispatch_segments(
            Arc::clone(&self.backend),
            segments,
            Arc::new(retry_request),
            &self.dispatch_limits(),
            cancel,
            observer,
        )
        .await
        {
            Ok(retried) => {
                let mut recovered = 0;
                for r in retried.into_iter().filter(|r| !r.text.trim().is_empty()) {
                    if let Some(t) = transcripts.iter_mut().find(|t| t.index == r.index) {
                        t.text = r.text;
                        recovered += 1;
                    }
                }
                self.store
                    .append_log(id, format!("recovered {recovered} of {count} empty segment(s)"))?;
            }
            Err(DispatchError::Cancelled { .. }) => {}
            Err(e) => {
                tracing::warn!(job_id = %id, "empty-segment retry failed: {e}");
                self.store
                    .append_log(id, format!("empty-segment retry failed: {e}; keeping silence"))?;
            }
        }
        Ok(transcripts)
    }

    /// Run a front-end call on the blocking pool.
    async fn on_frontend<T, F>(&self, source: &Path, f: F) -> Result<T, JobFailure>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AudioFrontEnd, &Path) -> anyhow::Result<T> + Send + 'static,
    {
        let frontend = Arc::clone(&self.frontend);
        let path = source.to_path_buf();
        tokio::task::spawn_blocking(move || f(frontend.as_ref(), &path))
            .await
            .map_err(|e| JobFailure::new(ErrorCode::WorkerFault, format!("audio task failed: {e}")))?
            .map_err(|e| JobFailure::new(ErrorCode::FrontEnd, format!("{e:#}")))
    }
}

fn check_clip_count(clips: usize, spans: usize) -> Result<(), JobFailure> {
    if clips == spans {
        return Ok(());
    }
    Err(JobFailure::new(
        ErrorCode::FrontEnd,
        format!("front end returned {clips} clip(s) for {spans} segment(s)"),
    ))
}

fn describe_speech(map: &SpeechMap) -> String {
    let speech: f64 = map.spans.iter().map(|s| s.duration()).sum();
    format!(
        "detected {} speech span(s), {:.1}s of {:.1}s",
        map.spans.len(),
        speech,
        map.total_seconds
    )
}
