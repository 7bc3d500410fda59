//! Validated, versioned per-job options.
//!
//! Options are fixed at submission. Anything outside the enumerated schema
//! or the documented ranges is rejected before a job record exists.

mod vad;

pub use vad::{
    VadOptions, VadParams, VadPreset, MIN_SILENCE_MS_RANGE, MIN_SPEECH_MS_RANGE,
    SPEECH_PAD_MS_RANGE, THRESHOLD_RANGE,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Current options schema version.
pub const OPTIONS_VERSION: u32 = 1;
pub const MAX_KEYWORDS: usize = 50;

pub const MIN_TRANSCRIBE_SEGMENT_RANGE: (f64, f64) = (0.2, 2.0);
pub const MERGE_GAP_RANGE: (f64, f64) = (0.0, 1.0);
pub const MAX_CHARS_RANGE: (usize, usize) = (10, 100);
pub const MAX_CUE_SECONDS_RANGE: (f64, f64) = (1.0, 30.0);

/// Rejection reasons for a submission. The job is never created.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("unsupported options version {0} (expected {OPTIONS_VERSION})")]
    UnsupportedVersion(u32),
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("too many keywords: {0} (max {MAX_KEYWORDS})")]
    TooManyKeywords(usize),
    #[error("invalid options: {0}")]
    Malformed(String),
    #[error("source file not found: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("upload too large: {size_mb} MiB (max {max_mb} MiB)")]
    TooLarge { size_mb: u64, max_mb: u64 },
    #[error("transcription backend is not configured (set DEEPGRAM_API_KEY)")]
    BackendNotConfigured,
}

pub(crate) fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Let the backend detect the spoken language.
    #[default]
    Auto,
    Zh,
    En,
    Ja,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Auto, Language::Zh, Language::En, Language::Ja];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::Zh => "zh",
            Language::En => "en",
            Language::Ja => "ja",
        }
    }

    /// Languages written without spaces between words (or possibly so, for auto).
    pub fn may_be_cjk(self) -> bool {
        matches!(self, Language::Auto | Language::Zh | Language::Ja)
    }
}

impl FromStr for Language {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or(ValidationError::UnsupportedLanguage(s))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Model {
    #[default]
    #[serde(rename = "nova-2-general")]
    Nova2General,
    #[serde(rename = "nova-3-general")]
    Nova3General,
    #[serde(rename = "whisper-large")]
    WhisperLarge,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Nova2General, Model::Nova3General, Model::WhisperLarge];

    pub fn as_str(self) -> &'static str {
        match self {
            Model::Nova2General => "nova-2-general",
            Model::Nova3General => "nova-3-general",
            Model::WhisperLarge => "whisper-large",
        }
    }

    /// Whisper-family models emit CJK text with stray spaces more often.
    pub fn is_whisper_family(self) -> bool {
        matches!(self, Model::WhisperLarge)
    }

    /// Backend-side formatting is on by default except for Whisper.
    pub fn default_smart_format(self) -> bool {
        !self.is_whisper_family()
    }
}

impl FromStr for Model {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Model::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or(ValidationError::UnsupportedModel(s))
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentationOptions {
    /// Speech spans shorter than this are merged into a neighbour or dropped.
    pub min_transcribe_segment_seconds: f64,
    /// Largest silence bridged when merging a short span into the previous one.
    pub short_segment_merge_gap_seconds: f64,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            min_transcribe_segment_seconds: 0.45,
            short_segment_merge_gap_seconds: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubtitleOptions {
    /// Characters per cue; `None` picks a per-language budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,
    pub max_cue_seconds: f64,
}

impl Default for SubtitleOptions {
    fn default() -> Self {
        Self {
            max_chars: None,
            max_cue_seconds: 7.0,
        }
    }
}

/// Caller-supplied tuning for one job (everything except language and model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecognitionOptions {
    pub version: u32,
    pub punctuate: bool,
    /// `None` uses the model's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_format: Option<bool>,
    pub diarize: bool,
    pub numerals: bool,
    pub profanity_filter: bool,
    pub filler_words: bool,
    pub keywords: Vec<String>,
    pub vad: VadOptions,
    pub segmentation: SegmentationOptions,
    pub subtitle: SubtitleOptions,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            version: OPTIONS_VERSION,
            punctuate: true,
            smart_format: None,
            diarize: false,
            numerals: false,
            profanity_filter: false,
            filler_words: false,
            keywords: Vec::new(),
            vad: VadOptions::default(),
            segmentation: SegmentationOptions::default(),
            subtitle: SubtitleOptions::default(),
        }
    }
}

impl RecognitionOptions {
    /// Parse a JSON options object. Unknown keys are an error.
    pub fn from_json(data: &str) -> Result<Self, ValidationError> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(data).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != OPTIONS_VERSION {
            return Err(ValidationError::UnsupportedVersion(self.version));
        }
        if self.keywords.len() > MAX_KEYWORDS {
            return Err(ValidationError::TooManyKeywords(self.keywords.len()));
        }
        self.vad.validate()?;
        check_range(
            "segmentation.min_transcribe_segment_seconds",
            self.segmentation.min_transcribe_segment_seconds,
            MIN_TRANSCRIBE_SEGMENT_RANGE.0,
            MIN_TRANSCRIBE_SEGMENT_RANGE.1,
        )?;
        check_range(
            "segmentation.short_segment_merge_gap_seconds",
            self.segmentation.short_segment_merge_gap_seconds,
            MERGE_GAP_RANGE.0,
            MERGE_GAP_RANGE.1,
        )?;
        if let Some(max_chars) = self.subtitle.max_chars {
            check_range(
                "subtitle.max_chars",
                max_chars as f64,
                MAX_CHARS_RANGE.0 as f64,
                MAX_CHARS_RANGE.1 as f64,
            )?;
        }
        check_range(
            "subtitle.max_cue_seconds",
            self.subtitle.max_cue_seconds,
            MAX_CUE_SECONDS_RANGE.0,
            MAX_CUE_SECONDS_RANGE.1,
        )?;
        Ok(())
    }
}

/// Immutable option snapshot stored with each job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobOptions {
    pub language: Language,
    pub model: Model,
    pub recognition: RecognitionOptions,
}

impl JobOptions {
    /// Parse language and model names and validate the tuning block.
    pub fn build(language: &str, model: &str, recognition: RecognitionOptions) -> Result<Self, ValidationError> {
        let language = language.parse::<Language>()?;
        let model = model.parse::<Model>()?;
        recognition.validate()?;
        let mut keywords: Vec<String> = recognition
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        keywords.dedup();
        Ok(Self {
            language,
            model,
            recognition: RecognitionOptions {
                keywords,
                ..recognition
            },
        })
    }

    pub fn smart_format(&self) -> bool {
        self.recognition
            .smart_format
            .unwrap_or_else(|| self.model.default_smart_format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_language_and_model() {
        assert_eq!("ZH".parse::<Language>().unwrap(), Language::Zh);
        assert_eq!("whisper-large".parse::<Model>().unwrap(), Model::WhisperLarge);
        assert_eq!(
            "fr".parse::<Language>(),
            Err(ValidationError::UnsupportedLanguage("fr".into()))
        );
        assert!(matches!(
            "nova-1".parse::<Model>(),
            Err(ValidationError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn build_defaults() {
        let opts = JobOptions::build("auto", "nova-2-general", RecognitionOptions::default()).unwrap();
        assert_eq!(opts.language, Language::Auto);
        assert!(opts.smart_format());
        let whisper = JobOptions::build("ja", "whisper-large", RecognitionOptions::default()).unwrap();
        assert!(!whisper.smart_format());
    }

    #[test]
    fn from_json_rejects_legacy_keys() {
        let err = RecognitionOptions::from_json(r#"{"utterance_split": 0.8}"#).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
        let err = RecognitionOptions::from_json(r#"{"vad_profile": "asmr"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn from_json_partial_document() {
        let opts = RecognitionOptions::from_json(
            r#"{"punctuate": false, "vad": {"preset": "mixed"}, "subtitle": {"max_chars": 30}}"#,
        )
        .unwrap();
        assert!(!opts.punctuate);
        assert_eq!(opts.vad.preset, Some(VadPreset::Mixed));
        assert_eq!(opts.subtitle.max_chars, Some(30));
        assert_eq!(opts.subtitle.max_cue_seconds, 7.0);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn validate_ranges() {
        let mut opts = RecognitionOptions::default();
        opts.segmentation.min_transcribe_segment_seconds = 5.0;
        assert!(matches!(opts.validate(), Err(ValidationError::OutOfRange { .. })));

        let mut opts = RecognitionOptions::default();
        opts.subtitle.max_chars = Some(4);
        assert!(opts.validate().is_err());

        let mut opts = RecognitionOptions::default();
        opts.version = 2;
        assert_eq!(opts.validate(), Err(ValidationError::UnsupportedVersion(2)));

        let mut opts = RecognitionOptions::default();
        opts.keywords = (0..51).map(|i| format!("k{i}")).collect();
        assert_eq!(opts.validate(), Err(ValidationError::TooManyKeywords(51)));
    }

    #[test]
    fn keywords_trimmed_on_build() {
        let rec = RecognitionOptions {
            keywords: vec![" kotoba ".into(), "".into()],
            ..Default::default()
        };
        let opts = JobOptions::build("en", "nova-3-general", rec).unwrap();
        assert_eq!(opts.recognition.keywords, vec!["kotoba".to_string()]);
    }

    #[test]
    fn job_options_json_roundtrip() {
        let opts = JobOptions::build("zh", "nova-2-general", RecognitionOptions::default()).unwrap();
        let json = serde_json::to_string(&opts).unwrap();
        let back: JobOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }
}
