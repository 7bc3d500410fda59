//! SRT rendering.

use super::Cue;

/// `HH:MM:SS,mmm`, rounded to the millisecond. Negative times clamp to zero.
pub fn format_timestamp(seconds: f64) -> String {
    let ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (h, rem) = (ms / 3_600_000, ms % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Blank-line separated cue blocks with a trailing newline.
pub fn render(cues: &[Cue]) -> String {
    cues.iter()
        .map(|c| {
            format!(
                "{}\n{} --> {}\n{}\n",
                c.index,
                format_timestamp(c.start),
                format_timestamp(c.end),
                c.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
