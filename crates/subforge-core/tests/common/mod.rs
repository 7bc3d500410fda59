//! Shared fixtures for subforge-core integration tests: scripted backend,
//! fixed-span front end, a stub listen server and studio builders.

#![allow(dead_code)]

pub mod listen_server;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use subforge_core::backend::{BackendError, TranscribeRequest, Transcriber};
use subforge_core::config::{RetryConfig, StudioConfig};
use subforge_core::frontend::{AudioFrontEnd, AudioSegment, SpeechMap, SpeechSpan};
use subforge_core::job_db::{JobDb, JobStatus};
use subforge_core::options::{Language, VadParams};
use subforge_core::storage::StorageLayout;
use subforge_core::studio::Studio;

/// Backend whose answers are scripted per segment index.
pub struct MockTranscriber {
    /// Text returned for segment `i`; missing entries answer "segment i".
    pub texts: Vec<String>,
    /// Segments whose first attempt fails with a retryable error.
    pub flaky: Mutex<HashSet<usize>>,
    /// Segments that are always rejected.
    pub broken: HashSet<usize>,
    /// Segments whose first answer is empty, whatever `texts` says.
    pub empty_once: Mutex<HashSet<usize>>,
    /// `(segment index, language)` of every call, in call order.
    pub requests: Mutex<Vec<(usize, Language)>>,
    pub delay: Duration,
    pub configured: bool,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self {
            texts: Vec::new(),
            flaky: Mutex::new(HashSet::new()),
            broken: HashSet::new(),
            empty_once: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            configured: true,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockTranscriber {
    pub fn with_texts(texts: &[&str]) -> Self {
        Self {
            texts: texts.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, segment: &AudioSegment, request: &TranscribeRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((segment.index, request.language));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken.contains(&segment.index) {
            return Err(BackendError::Rejected(format!("segment {} unsupported", segment.index)));
        }
        if self.flaky.lock().unwrap().remove(&segment.index) {
            return Err(BackendError::Unavailable("busy".into()));
        }
        if self.empty_once.lock().unwrap().remove(&segment.index) {
            return Ok(String::new());
        }
        Ok(self
            .texts
            .get(segment.index)
            .cloned()
            .unwrap_or_else(|| format!("segment {}", segment.index)))
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Front end that reports fixed speech spans for any source.
pub struct MockFrontEnd {
    pub total_seconds: f64,
    pub spans: Vec<SpeechSpan>,
    /// Clips left out of every `extract` answer.
    pub missing_clips: usize,
    /// Spans of every `extract` call, in call order.
    pub extracted: Mutex<Vec<Vec<SpeechSpan>>>,
}

impl MockFrontEnd {
    /// `count` two-second spans separated by one second of silence.
    pub fn evenly_spaced(count: usize) -> Self {
        let spans = (0..count)
            .map(|i| SpeechSpan::new(i as f64 * 3.0, i as f64 * 3.0 + 2.0))
            .collect();
        Self {
            total_seconds: count as f64 * 3.0,
            spans,
            missing_clips: 0,
            extracted: Mutex::new(Vec::new()),
        }
    }
}

impl AudioFrontEnd for MockFrontEnd {
    fn probe(&self, _source: &Path) -> Result<()> {
        Ok(())
    }

    fn detect_speech(&self, _source: &Path, _vad: &VadParams) -> Result<SpeechMap> {
        Ok(SpeechMap {
            total_seconds: self.total_seconds,
            spans: self.spans.clone(),
        })
    }

    fn extract(&self, _source: &Path, spans: &[SpeechSpan]) -> Result<Vec<Vec<u8>>> {
        self.extracted.lock().unwrap().push(spans.to_vec());
        let keep = spans.len().saturating_sub(self.missing_clips);
        Ok(spans.iter().take(keep).map(|_| b"RIFF".to_vec()).collect())
    }
}

/// Config rooted in `dir` with instant retries and fast flushes.
pub fn test_config(dir: &Path) -> StudioConfig {
    let mut cfg = StudioConfig::default();
    cfg.data_dir = Some(dir.join("data"));
    cfg.concurrency = 4;
    cfg.store.meta_flush_interval_ms = 200;
    cfg.retry = Some(RetryConfig {
        max_attempts: 3,
        base_delay_secs: 0.0,
        max_delay_secs: 0,
    });
    cfg
}

pub async fn open_studio(
    dir: &Path,
    cfg: StudioConfig,
    backend: Arc<dyn Transcriber>,
    frontend: Arc<dyn AudioFrontEnd>,
) -> Studio {
    let db = JobDb::open_at(dir.join("jobs.db")).await.unwrap();
    let layout = StorageLayout::from_config(&cfg).unwrap();
    Studio::with_parts(cfg, db, layout, backend, frontend).await.unwrap()
}

/// A small file to submit; its contents are irrelevant to the mock front end.
pub fn source_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"RIFF....WAVE").unwrap();
    path
}

/// Poll until `id` reaches `status` or the timeout elapses.
pub async fn wait_for_status(studio: &Studio, id: &str, status: JobStatus, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if studio.status(id, 0).map(|s| s.status) == Some(status) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Write `seconds` of 16 kHz mono audio: silence, with a 440 Hz tone over
/// each `(start, end)` range.
pub fn write_tone_wav(path: &Path, seconds: f64, tones: &[(f64, f64)]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let total = (seconds * 16_000.0) as usize;
    for n in 0..total {
        let t = n as f64 / 16_000.0;
        let on = tones.iter().any(|&(s, e)| t >= s && t < e);
        let v = if on {
            0.3 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()
        } else {
            0.0
        };
        writer.write_sample((v * i16::MAX as f64) as i16).unwrap();
    }
    writer.finalize().unwrap();
}
