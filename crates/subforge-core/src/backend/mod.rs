//! Transcription backend seam.
//!
//! The dispatcher only sees `Transcriber`. `DeepgramTranscriber` is the
//! production implementation; tests plug in scripted backends.

mod deepgram;
mod error;

pub use deepgram::{parse_transcript, DeepgramTranscriber};
pub use error::BackendError;

use async_trait::async_trait;

use crate::frontend::AudioSegment;
use crate::options::{JobOptions, Language, Model};

/// Recognition parameters for every segment of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub language: Language,
    pub model: Model,
    pub punctuate: bool,
    pub smart_format: bool,
    pub diarize: bool,
    pub numerals: bool,
    pub profanity_filter: bool,
    pub filler_words: bool,
    pub keywords: Vec<String>,
}

impl From<&JobOptions> for TranscribeRequest {
    fn from(opts: &JobOptions) -> Self {
        let rec = &opts.recognition;
        Self {
            language: opts.language,
            model: opts.model,
            punctuate: rec.punctuate,
            smart_format: opts.smart_format(),
            diarize: rec.diarize,
            numerals: rec.numerals,
            profanity_filter: rec.profanity_filter,
            filler_words: rec.filler_words,
            keywords: rec.keywords.clone(),
        }
    }
}

/// External speech-to-text engine.
///
/// `Ok("")` means the segment held no recognizable speech; it is a success.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        request: &TranscribeRequest,
    ) -> Result<String, BackendError>;

    /// Whether credentials and endpoint are present. Checked at submission.
    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}
