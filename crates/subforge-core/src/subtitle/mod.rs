//! Subtitle assembly: segment transcripts in, ordered SRT cues out.
//!
//! Per segment: normalise the text, split it into lines within the
//! character budget, spread the segment's time over the lines. Then a final
//! pass over all cues removes overlaps, merges stutter duplicates and
//! numbers the cues from 1.

mod split;
pub mod srt;
mod text;
mod timing;

pub use split::{char_budget, split_lines, split_sentences};
pub use text::{is_cjk, normalize_transcript, repair_cjk_spacing};
pub use timing::{allocate, fit_lines, TimedLine, MIN_SEGMENT_SECONDS};

use serde::Serialize;

use crate::options::{JobOptions, Language, Model};

/// Adjacent cues with the same text and at most this gap are merged.
const DUPLICATE_MERGE_GAP: f64 = 0.12;

/// Backend output for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTranscript {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    /// Raw backend text; empty means silence.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cue {
    /// 1-based, contiguous.
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyOptions {
    pub language: Language,
    pub model: Model,
    pub max_chars: Option<usize>,
    pub max_cue_seconds: f64,
}

impl From<&JobOptions> for AssemblyOptions {
    fn from(opts: &JobOptions) -> Self {
        Self {
            language: opts.language,
            model: opts.model,
            max_chars: opts.recognition.subtitle.max_chars,
            max_cue_seconds: opts.recognition.subtitle.max_cue_seconds,
        }
    }
}

/// Build the cue list for a job. Returns no cues when every transcript is
/// empty after cleanup.
pub fn assemble(transcripts: &[SegmentTranscript], opts: &AssemblyOptions) -> Vec<Cue> {
    let mut ordered: Vec<&SegmentTranscript> = transcripts.iter().collect();
    ordered.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then(a.end.total_cmp(&b.end))
            .then(a.index.cmp(&b.index))
    });

    let budget = char_budget(opts.language, opts.model, opts.max_chars);
    let mut timed: Vec<TimedLine> = Vec::new();
    for seg in ordered {
        let text = normalize_transcript(&seg.text, opts.language, opts.model);
        if text.is_empty() {
            continue;
        }
        let lines = split_lines(&text, opts.language, budget);
        timed.extend(fit_lines(seg.start, seg.end, lines, opts.max_cue_seconds));
    }

    let mut cues: Vec<Cue> = Vec::with_capacity(timed.len());
    let mut prev_end = 0.0_f64;
    for line in timed {
        let text = line.text.trim();
        if text.is_empty() {
            continue;
        }
        let start = line.start.max(prev_end);
        let end = if line.end > start {
            line.end
        } else {
            start + MIN_SEGMENT_SECONDS
        };
        if let Some(last) = cues.last_mut() {
            if last.text == text
                && start - last.end <= DUPLICATE_MERGE_GAP
                && end - last.start <= opts.max_cue_seconds
            {
                last.end = last.end.max(end);
                prev_end = last.end;
                continue;
            }
        }
        cues.push(Cue {
            index: cues.len() + 1,
            start,
            end,
            text: text.to_string(),
        });
        prev_end = end;
    }
    cues
}
