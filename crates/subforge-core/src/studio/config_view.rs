//! What a client may submit: languages, models, option defaults and ranges.

use serde::Serialize;
use std::collections::BTreeMap;

use super::Studio;
use crate::options::{
    Language, Model, RecognitionOptions, VadParams, VadPreset, MAX_CHARS_RANGE, MAX_CUE_SECONDS_RANGE,
    MAX_KEYWORDS, MERGE_GAP_RANGE, MIN_SILENCE_MS_RANGE, MIN_SPEECH_MS_RANGE, MIN_TRANSCRIBE_SEGMENT_RANGE,
    OPTIONS_VERSION, SPEECH_PAD_MS_RANGE, THRESHOLD_RANGE,
};

/// Inclusive `[min, max]` bounds of every numeric option.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionRanges {
    pub vad_threshold: (f64, f64),
    pub vad_min_silence_ms: (u32, u32),
    pub vad_min_speech_ms: (u32, u32),
    pub vad_speech_pad_ms: (u32, u32),
    pub min_transcribe_segment_seconds: (f64, f64),
    pub short_segment_merge_gap_seconds: (f64, f64),
    pub max_chars: (usize, usize),
    pub max_cue_seconds: (f64, f64),
    pub max_keywords: usize,
}

impl Default for OptionRanges {
    fn default() -> Self {
        Self {
            vad_threshold: THRESHOLD_RANGE,
            vad_min_silence_ms: MIN_SILENCE_MS_RANGE,
            vad_min_speech_ms: MIN_SPEECH_MS_RANGE,
            vad_speech_pad_ms: SPEECH_PAD_MS_RANGE,
            min_transcribe_segment_seconds: MIN_TRANSCRIBE_SEGMENT_RANGE,
            short_segment_merge_gap_seconds: MERGE_GAP_RANGE,
            max_chars: MAX_CHARS_RANGE,
            max_cue_seconds: MAX_CUE_SECONDS_RANGE,
            max_keywords: MAX_KEYWORDS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub options_version: u32,
    pub languages: Vec<&'static str>,
    pub models: Vec<&'static str>,
    pub default_language: &'static str,
    pub default_model: &'static str,
    /// Detector parameters used when no preset or override is given.
    pub vad_defaults: VadParams,
    pub vad_presets: BTreeMap<&'static str, VadParams>,
    pub defaults: RecognitionOptions,
    pub ranges: OptionRanges,
    pub max_upload_mb: u64,
    pub max_queued_jobs: usize,
    pub backend: String,
    pub backend_configured: bool,
}

impl Studio {
    pub fn config(&self) -> ConfigView {
        ConfigView {
            options_version: OPTIONS_VERSION,
            languages: Language::ALL.iter().map(|l| l.as_str()).collect(),
            models: Model::ALL.iter().map(|m| m.as_str()).collect(),
            default_language: Language::default().as_str(),
            default_model: Model::default().as_str(),
            vad_defaults: VadParams::default(),
            vad_presets: VadPreset::ALL.iter().map(|p| (p.as_str(), p.params())).collect(),
            defaults: RecognitionOptions::default(),
            ranges: OptionRanges::default(),
            max_upload_mb: self.cfg.max_upload_mb,
            max_queued_jobs: self.cfg.max_queued_jobs,
            backend: self.backend.name().to_string(),
            backend_configured: self.backend.is_configured(),
        }
    }
}
