//! Time reallocation: spread a segment's duration over its lines.

/// Width given to a segment whose end is not after its start.
pub const MIN_SEGMENT_SECONDS: f64 = 0.2;
const MAX_RESPLITS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct TimedLine {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

fn weight(line: &str) -> f64 {
    line.chars().count().max(1) as f64
}

/// Lay `lines` end to end over `[start, end)`, each getting a share
/// proportional to its character count. The first line starts at `start`
/// and the last ends exactly at `end`.
pub fn allocate(start: f64, end: f64, lines: &[String]) -> Vec<TimedLine> {
    if lines.is_empty() {
        return Vec::new();
    }
    let end = if end > start { end } else { start + MIN_SEGMENT_SECONDS };
    let duration = end - start;
    let total: f64 = lines.iter().map(|l| weight(l)).sum();

    let mut out = Vec::with_capacity(lines.len());
    let mut cumulative = 0.0;
    let mut t = start;
    for (i, line) in lines.iter().enumerate() {
        cumulative += weight(line);
        let next = if i + 1 == lines.len() {
            end
        } else {
            start + duration * (cumulative / total)
        };
        out.push(TimedLine {
            start: t,
            end: next,
            text: line.clone(),
        });
        t = next;
    }
    out
}

/// Split `line` in two near its middle, preferring whitespace.
fn halve(line: &str) -> (String, String) {
    let chars: Vec<char> = line.chars().collect();
    let mid = chars.len() / 2;
    let cut = (1..chars.len())
        .filter(|&k| chars[k].is_whitespace())
        .min_by_key(|&k| k.abs_diff(mid))
        .filter(|&k| k.abs_diff(mid) <= chars.len() / 4)
        .unwrap_or(mid);
    let a: String = chars[..cut].iter().collect();
    let b: String = chars[cut..].iter().collect();
    (a.trim().to_string(), b.trim().to_string())
}

/// `allocate`, then keep halving any line whose cue runs longer than
/// `max_cue_seconds` (lines of a single character are left alone).
pub fn fit_lines(start: f64, end: f64, lines: Vec<String>, max_cue_seconds: f64) -> Vec<TimedLine> {
    let mut lines = lines;
    for _ in 0..MAX_RESPLITS {
        let timed = allocate(start, end, &lines);
        let too_long = timed
            .iter()
            .position(|t| t.end - t.start > max_cue_seconds && t.text.chars().count() > 1);
        let Some(pos) = too_long else {
            return timed;
        };
        let (a, b) = halve(&lines[pos]);
        if a.is_empty() || b.is_empty() {
            return timed;
        }
        lines.splice(pos..=pos, [a, b]);
    }
    allocate(start, end, &lines)
}
