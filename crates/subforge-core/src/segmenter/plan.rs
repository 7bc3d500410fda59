//! Span filtering, force-splitting and short-span merging.

use crate::config::SegmentationConfig;
use crate::frontend::{SpeechMap, SpeechSpan};
use crate::options::SegmentationOptions;

/// Shortest lone span worth a backend call, whatever the job options say.
const KEEP_FLOOR_SECONDS: f64 = 0.22;

/// Planning bounds: service-wide limits plus the job's segmentation options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlanParams {
    /// Detected spans shorter than this are noise.
    pub min_segment_seconds: f64,
    /// Longer spans are split into equal pieces.
    pub max_segment_seconds: f64,
    /// Spans shorter than this are merged into a neighbour or dropped.
    pub min_transcribe_seconds: f64,
    /// Largest gap a short span may be bridged across.
    pub merge_gap: f64,
}

impl SegmentPlanParams {
    pub fn new(cfg: &SegmentationConfig, opts: &SegmentationOptions) -> Self {
        Self {
            min_segment_seconds: cfg.min_segment_seconds,
            max_segment_seconds: cfg.max_segment_seconds,
            min_transcribe_seconds: opts.min_transcribe_segment_seconds,
            merge_gap: opts.short_segment_merge_gap_seconds,
        }
    }
}

/// Planned spans plus counters for the job log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentPlan {
    pub spans: Vec<SpeechSpan>,
    /// Extra pieces created by force-splitting long spans.
    pub split: usize,
    /// Short spans folded into the previous span.
    pub merged: usize,
    /// Spans discarded as too short.
    pub dropped: usize,
}

impl SegmentPlan {
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }
}

/// Builds the backend segment plan for one source.
///
/// Returns an empty plan only when the source has no audio at all.
pub fn plan_segments(map: &SpeechMap, params: &SegmentPlanParams) -> SegmentPlan {
    let mut plan = SegmentPlan::default();

    let mut kept: Vec<SpeechSpan> = map
        .spans
        .iter()
        .filter(|s| s.duration() >= params.min_segment_seconds)
        .copied()
        .collect();
    plan.dropped += map.spans.len() - kept.len();

    if kept.is_empty() {
        if map.total_seconds <= 0.0 {
            return plan;
        }
        // Nothing usable was detected: let the backend judge the whole file.
        kept.push(SpeechSpan::new(0.0, map.total_seconds));
    }

    let mut pieces: Vec<SpeechSpan> = Vec::with_capacity(kept.len());
    for span in kept {
        let n = force_split_count(span.duration(), params.max_segment_seconds);
        let step = span.duration() / n as f64;
        for i in 0..n {
            let start = span.start + step * i as f64;
            let end = if i + 1 == n { span.end } else { start + step };
            pieces.push(SpeechSpan::new(start, end));
        }
        plan.split += n - 1;
    }

    let keep_floor = KEEP_FLOOR_SECONDS.max(0.6 * params.min_transcribe_seconds);
    let mut out: Vec<SpeechSpan> = Vec::with_capacity(pieces.len());
    for span in &pieces {
        if span.duration() >= params.min_transcribe_seconds {
            out.push(*span);
            continue;
        }
        if let Some(prev) = out.last_mut() {
            let gap = span.start - prev.end;
            if gap <= params.merge_gap && span.end - prev.start <= params.max_segment_seconds {
                prev.end = span.end;
                plan.merged += 1;
                continue;
            }
        }
        if span.duration() >= keep_floor {
            out.push(*span);
        } else {
            plan.dropped += 1;
        }
    }

    if out.is_empty() {
        if let Some(longest) = pieces
            .iter()
            .max_by(|a, b| a.duration().total_cmp(&b.duration()))
        {
            out.push(*longest);
            plan.dropped = plan.dropped.saturating_sub(1);
        }
    }

    plan.spans = out;
    plan
}

/// Window re-sent for a segment the backend heard as silence: the span
/// padded on both sides (more for longer spans), clamped to the source.
pub fn empty_retry_window(span: SpeechSpan, total_seconds: f64) -> SpeechSpan {
    let pad = if span.duration() < 1.2 {
        0.22
    } else if span.duration() < 3.0 {
        0.35
    } else {
        0.50
    };
    let start = (span.start - pad).max(0.0);
    let mut end = span.end + pad;
    if total_seconds > 0.0 {
        end = end.min(total_seconds);
    }
    SpeechSpan::new(start, end.max(start + 0.02))
}

fn force_split_count(duration: f64, max: f64) -> usize {
    if max <= 0.0 || duration <= max {
        1
    } else {
        (duration / max).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SegmentPlanParams {
        SegmentPlanParams {
            min_segment_seconds: 0.25,
            max_segment_seconds: 15.0,
            min_transcribe_seconds: 0.45,
            merge_gap: 0.2,
        }
    }

    fn map(total: f64, spans: &[(f64, f64)]) -> SpeechMap {
        SpeechMap {
            total_seconds: total,
            spans: spans.iter().map(|&(s, e)| SpeechSpan::new(s, e)).collect(),
        }
    }

    fn assert_ordered(spans: &[SpeechSpan]) {
        for w in spans.windows(2) {
            assert!(w[0].end <= w[1].start, "{:?} overlaps {:?}", w[0], w[1]);
        }
        for s in spans {
            assert!(s.end > s.start);
        }
    }

    #[test]
    fn keeps_normal_spans() {
        let plan = plan_segments(&map(10.0, &[(0.5, 2.0), (3.0, 6.0)]), &params());
        assert_eq!(plan.spans, vec![SpeechSpan::new(0.5, 2.0), SpeechSpan::new(3.0, 6.0)]);
        assert_eq!((plan.split, plan.merged, plan.dropped), (0, 0, 0));
    }

    #[test]
    fn long_span_is_split_evenly() {
        let plan = plan_segments(&map(40.0, &[(0.0, 40.0)]), &params());
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.split, 2);
        assert_ordered(&plan.spans);
        for s in &plan.spans {
            assert!(s.duration() <= 15.0 + 1e-9);
        }
        assert_eq!(plan.spans[2].end, 40.0);
    }

    #[test]
    fn short_span_merges_into_previous() {
        let plan = plan_segments(&map(10.0, &[(1.0, 3.0), (3.1, 3.4)]), &params());
        assert_eq!(plan.spans, vec![SpeechSpan::new(1.0, 3.4)]);
        assert_eq!(plan.merged, 1);
    }

    #[test]
    fn lone_short_span_kept_or_dropped_by_floor() {
        // 0.3 s with floor max(0.22, 0.27) is kept.
        let plan = plan_segments(&map(10.0, &[(1.0, 3.0), (5.0, 5.3)]), &params());
        assert_eq!(plan.len(), 2);

        // 0.26 s is below the floor and too far away to merge.
        let plan = plan_segments(&map(10.0, &[(1.0, 3.0), (5.0, 5.26)]), &params());
        assert_eq!(plan.spans, vec![SpeechSpan::new(1.0, 3.0)]);
        assert_eq!(plan.dropped, 1);
    }

    #[test]
    fn noise_only_falls_back_to_whole_file() {
        let plan = plan_segments(&map(4.0, &[(1.0, 1.1)]), &params());
        assert_eq!(plan.spans, vec![SpeechSpan::new(0.0, 4.0)]);

        let plan = plan_segments(&map(4.0, &[]), &params());
        assert_eq!(plan.spans, vec![SpeechSpan::new(0.0, 4.0)]);
    }

    #[test]
    fn never_empty_for_non_empty_input() {
        let p = SegmentPlanParams {
            min_transcribe_seconds: 2.0,
            ..params()
        };
        let plan = plan_segments(&map(0.3, &[]), &p);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn retry_window_padding_grows_with_span() {
        let w = empty_retry_window(SpeechSpan::new(1.0, 2.0), 60.0);
        assert!((w.start - 0.78).abs() < 1e-9 && (w.end - 2.22).abs() < 1e-9, "{w:?}");

        let w = empty_retry_window(SpeechSpan::new(10.0, 12.0), 60.0);
        assert!((w.start - 9.65).abs() < 1e-9 && (w.end - 12.35).abs() < 1e-9, "{w:?}");

        let w = empty_retry_window(SpeechSpan::new(0.1, 5.0), 5.2);
        assert_eq!(w, SpeechSpan::new(0.0, 5.2));
    }

    #[test]
    fn empty_source_yields_empty_plan() {
        assert!(plan_segments(&map(0.0, &[]), &params()).is_empty());
    }
}
