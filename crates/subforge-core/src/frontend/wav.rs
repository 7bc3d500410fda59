//! Built-in front end for WAV sources (via hound).
//!
//! Speech detection is an energy gate: 30 ms frames whose RMS reaches
//! `threshold * RMS_PER_THRESHOLD` count as speech. Runs are then shaped by
//! the VAD timing parameters (bridge short silences, drop short bursts, pad).

use anyhow::{bail, Context, Result};
use std::io::Cursor;
use std::path::Path;

use super::{AudioFrontEnd, SpeechMap, SpeechSpan};
use crate::options::VadParams;

pub const FRAME_MS: u32 = 30;
/// RMS level per unit of VAD threshold: the default threshold 0.5 gates at 0.02.
pub const RMS_PER_THRESHOLD: f64 = 0.04;

struct MonoPcm {
    sample_rate: u32,
    samples: Vec<f32>,
}

fn read_mono(path: &Path) -> Result<MonoPcm> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("open WAV {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        bail!("WAV {} has an empty format header", path.display());
    }
    let channels = usize::from(spec.channels);
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("decode float samples")?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("decode integer samples")?
        }
    };
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok(MonoPcm {
        sample_rate: spec.sample_rate,
        samples,
    })
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

/// Turn per-frame speech flags into padded spans.
pub(crate) fn spans_from_frames(flags: &[bool], frame_secs: f64, total_seconds: f64, vad: &VadParams) -> Vec<SpeechSpan> {
    // Runs of speech frames as [start, end) frame indices.
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut open: Option<usize> = None;
    for (i, &speech) in flags.iter().enumerate() {
        match (speech, open) {
            (true, None) => open = Some(i),
            (false, Some(start)) => {
                runs.push((start, i));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        runs.push((start, flags.len()));
    }

    let min_silence = f64::from(vad.min_silence_ms) / 1000.0;
    let mut bridged: Vec<(usize, usize)> = Vec::with_capacity(runs.len());
    for run in runs {
        match bridged.last_mut() {
            Some(last) if ((run.0 - last.1) as f64) * frame_secs < min_silence => last.1 = run.1,
            _ => bridged.push(run),
        }
    }

    let min_speech = f64::from(vad.min_speech_ms) / 1000.0;
    let pad = f64::from(vad.speech_pad_ms) / 1000.0;
    let mut spans: Vec<SpeechSpan> = Vec::new();
    for (s, e) in bridged {
        if ((e - s) as f64) * frame_secs < min_speech {
            continue;
        }
        let start = (s as f64 * frame_secs - pad).max(0.0);
        let end = (e as f64 * frame_secs + pad).min(total_seconds);
        if end <= start {
            continue;
        }
        match spans.last_mut() {
            Some(last) if start <= last.end => last.end = last.end.max(end),
            _ => spans.push(SpeechSpan::new(start, end)),
        }
    }
    spans
}

fn encode_clip(pcm: &MonoPcm, span: &SpeechSpan) -> Result<Vec<u8>> {
    let sr = f64::from(pcm.sample_rate);
    let len = pcm.samples.len();
    let from = ((span.start * sr).floor().max(0.0) as usize).min(len);
    let to = ((span.end * sr).ceil().max(0.0) as usize).clamp(from, len);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("start WAV clip")?;
        for s in &pcm.samples[from..to] {
            writer.write_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)?;
        }
        writer.finalize().context("finish WAV clip")?;
    }
    Ok(cursor.into_inner())
}

/// Front end for PCM or float WAV files. Other containers are rejected at
/// submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavFrontEnd;

impl AudioFrontEnd for WavFrontEnd {
    fn probe(&self, source: &Path) -> Result<()> {
        let reader = hound::WavReader::open(source)
            .with_context(|| format!("{} is not a readable WAV file", source.display()))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 || spec.channels == 0 {
            bail!("{} has an empty WAV format header", source.display());
        }
        Ok(())
    }

    fn detect_speech(&self, source: &Path, vad: &VadParams) -> Result<SpeechMap> {
        let pcm = read_mono(source)?;
        let sr = f64::from(pcm.sample_rate);
        let total_seconds = pcm.samples.len() as f64 / sr;
        let frame_len = ((sr * f64::from(FRAME_MS) / 1000.0) as usize).max(1);
        let gate = (vad.threshold * RMS_PER_THRESHOLD) as f32;
        let flags: Vec<bool> = pcm.samples.chunks(frame_len).map(|f| rms(f) >= gate).collect();
        let frame_secs = frame_len as f64 / sr;
        Ok(SpeechMap {
            total_seconds,
            spans: spans_from_frames(&flags, frame_secs, total_seconds, vad),
        })
    }

    fn extract(&self, source: &Path, spans: &[SpeechSpan]) -> Result<Vec<Vec<u8>>> {
        let pcm = read_mono(source)?;
        spans.iter().map(|span| encode_clip(&pcm, span)).collect()
    }
}
