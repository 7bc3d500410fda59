//! Audio front end seam: speech detection and segment extraction.
//!
//! Front ends are synchronous (file and CPU bound); the worker calls them on
//! tokio's blocking pool.

mod wav;

pub use wav::{WavFrontEnd, FRAME_MS, RMS_PER_THRESHOLD};

use anyhow::Result;
use std::path::Path;

use crate::options::VadParams;

/// Half-open time range `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechSpan {
    pub start: f64,
    pub end: f64,
}

impl SpeechSpan {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Result of speech detection over a whole source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechMap {
    pub total_seconds: f64,
    /// Ordered, non-overlapping.
    pub spans: Vec<SpeechSpan>,
}

/// One slice of source audio sent to the backend as a unit.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// 0-based position in the job's segment list.
    pub index: usize,
    pub start: f64,
    pub end: f64,
    /// Encoded audio (16-bit mono WAV).
    pub audio: Vec<u8>,
}

pub trait AudioFrontEnd: Send + Sync {
    /// Cheap header check at submission time. Rejects inputs this front end
    /// cannot decode.
    fn probe(&self, source: &Path) -> Result<()>;

    fn detect_speech(&self, source: &Path, vad: &VadParams) -> Result<SpeechMap>;

    /// Encode each span as a standalone clip, in order.
    fn extract(&self, source: &Path, spans: &[SpeechSpan]) -> Result<Vec<Vec<u8>>>;
}
