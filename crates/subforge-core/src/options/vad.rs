//! Voice-activity detection options: presets plus per-field overrides.

use serde::{Deserialize, Serialize};

use super::{check_range, ValidationError};

pub const THRESHOLD_RANGE: (f64, f64) = (0.1, 0.95);
pub const MIN_SILENCE_MS_RANGE: (u32, u32) = (50, 3000);
pub const MIN_SPEECH_MS_RANGE: (u32, u32) = (50, 3000);
pub const SPEECH_PAD_MS_RANGE: (u32, u32) = (0, 1000);

/// Tuning bundles for common material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadPreset {
    /// Ordinary speech: conversations, lectures.
    General,
    /// Whispered or very quiet speech.
    Asmr,
    /// Speech over music or ambient sound.
    Mixed,
}

impl VadPreset {
    pub const ALL: [VadPreset; 3] = [VadPreset::General, VadPreset::Asmr, VadPreset::Mixed];

    pub fn as_str(self) -> &'static str {
        match self {
            VadPreset::General => "general",
            VadPreset::Asmr => "asmr",
            VadPreset::Mixed => "mixed",
        }
    }

    pub fn params(self) -> VadParams {
        match self {
            VadPreset::General => VadParams::new(0.55, 420, 240, 110),
            VadPreset::Asmr => VadParams::new(0.35, 300, 140, 180),
            VadPreset::Mixed => VadParams::new(0.45, 360, 180, 140),
        }
    }
}

/// Resolved detector parameters handed to the audio front end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadParams {
    /// Speech probability threshold in `[0.1, 0.95]`.
    pub threshold: f64,
    pub min_silence_ms: u32,
    pub min_speech_ms: u32,
    pub speech_pad_ms: u32,
}

impl VadParams {
    pub const fn new(threshold: f64, min_silence_ms: u32, min_speech_ms: u32, speech_pad_ms: u32) -> Self {
        Self {
            threshold,
            min_silence_ms,
            min_speech_ms,
            speech_pad_ms,
        }
    }
}

impl Default for VadParams {
    fn default() -> Self {
        Self::new(0.5, 400, 220, 120)
    }
}

/// Submitted VAD settings. Overrides apply on top of the preset (or the
/// defaults when no preset is named).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VadOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<VadPreset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_silence_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_speech_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_pad_ms: Option<u32>,
}

impl VadOptions {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(t) = self.threshold {
            check_range("vad.threshold", t, THRESHOLD_RANGE.0, THRESHOLD_RANGE.1)?;
        }
        let ms_fields = [
            ("vad.min_silence_ms", self.min_silence_ms, MIN_SILENCE_MS_RANGE),
            ("vad.min_speech_ms", self.min_speech_ms, MIN_SPEECH_MS_RANGE),
            ("vad.speech_pad_ms", self.speech_pad_ms, SPEECH_PAD_MS_RANGE),
        ];
        for (field, value, (min, max)) in ms_fields {
            if let Some(v) = value {
                check_range(field, f64::from(v), f64::from(min), f64::from(max))?;
            }
        }
        Ok(())
    }

    pub fn resolve(&self) -> VadParams {
        let base = self.preset.map(VadPreset::params).unwrap_or_default();
        VadParams {
            threshold: self.threshold.unwrap_or(base.threshold),
            min_silence_ms: self.min_silence_ms.unwrap_or(base.min_silence_ms),
            min_speech_ms: self.min_speech_ms.unwrap_or(base.min_speech_ms),
            speech_pad_ms: self.speech_pad_ms.unwrap_or(base.speech_pad_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_overrides_apply_field_by_field() {
        let opts = VadOptions {
            preset: Some(VadPreset::Asmr),
            min_speech_ms: Some(500),
            ..Default::default()
        };
        let p = opts.resolve();
        assert_eq!(p.threshold, 0.35);
        assert_eq!(p.min_silence_ms, 300);
        assert_eq!(p.min_speech_ms, 500);
        assert_eq!(p.speech_pad_ms, 180);
    }

    #[test]
    fn no_preset_uses_defaults() {
        assert_eq!(VadOptions::default().resolve(), VadParams::default());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let opts = VadOptions {
            threshold: Some(0.99),
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ValidationError::OutOfRange { field: "vad.threshold", .. })
        ));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = serde_json::from_str::<VadOptions>(r#"{"noise_floor_db": -50}"#);
        assert!(err.is_err());
    }
}
