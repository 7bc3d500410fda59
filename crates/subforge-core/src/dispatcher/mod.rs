//! Bounded-concurrency segment dispatch.
//!
//! Sends every segment of one job to the backend, keeping at most
//! `concurrency` calls in flight, retrying transient failures with backoff.
//! The first permanent failure stops further dispatch; in-flight calls are
//! always drained before returning.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::backend::{BackendError, TranscribeRequest, Transcriber};
use crate::control::CancelToken;
use crate::frontend::AudioSegment;
use crate::retry::{run_with_retry, RetryExhausted, RetryPolicy};
use crate::subtitle::SegmentTranscript;

#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    /// Backend calls in flight at once (at least 1).
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

/// Per-segment acknowledgement state, local to one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    InFlight,
    Done,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch cancelled after {completed} segment(s)")]
    Cancelled { completed: usize },
    #[error("segment {index} failed after {attempts} attempt(s): {source}")]
    SegmentFailed {
        index: usize,
        attempts: u32,
        #[source]
        source: BackendError,
    },
    /// A dispatch task panicked.
    #[error("segment task failed: {0}")]
    Internal(String),
}

/// Callbacks for progress reporting. Called from dispatch tasks; keep them cheap.
pub trait DispatchObserver: Send + Sync {
    fn segment_retrying(&self, _index: usize, _attempt: u32, _error: &BackendError, _delay: Duration) {}

    /// `done` segments out of `total` have a transcript.
    fn segment_finished(&self, _done: usize, _total: usize) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}

type TaskOutput = (usize, SegmentTranscript, Result<(), RetryExhausted>);

/// Transcribe `segments` and return one transcript per segment, ordered by
/// segment index. Empty transcripts (silence) are successes.
///
/// Cancellation is checked before every dispatch and before every wait;
/// when both a cancel and a failure happen, the result is `Cancelled`.
pub async fn dispatch_segments(
    backend: Arc<dyn Transcriber>,
    segments: Vec<AudioSegment>,
    request: Arc<TranscribeRequest>,
    limits: &DispatchLimits,
    cancel: &CancelToken,
    observer: Arc<dyn DispatchObserver>,
) -> Result<Vec<SegmentTranscript>, DispatchError> {
    let total = segments.len();
    let concurrency = limits.concurrency.max(1);
    let policy = limits.retry;

    let mut states = vec![SegmentState::Pending; total];
    let mut results: Vec<Option<SegmentTranscript>> = vec![None; total];
    let mut pending: VecDeque<(usize, AudioSegment)> = segments.into_iter().enumerate().collect();
    let mut set: JoinSet<TaskOutput> = JoinSet::new();
    let mut done = 0usize;
    let mut failure: Option<DispatchError> = None;

    loop {
        while failure.is_none() && set.len() < concurrency {
            if cancel.is_cancelled() {
                break;
            }
            let Some((pos, segment)) = pending.pop_front() else {
                break;
            };
            states[pos] = SegmentState::InFlight;
            let backend = Arc::clone(&backend);
            let request = Arc::clone(&request);
            let observer = Arc::clone(&observer);
            set.spawn(async move {
                let index = segment.index;
                let (seg, req, be) = (&segment, &*request, &*backend);
                let outcome = run_with_retry(
                    &policy,
                    move |_| be.transcribe(seg, req),
                    |attempt, err, delay| observer.segment_retrying(index, attempt, err, delay),
                )
                .await;
                let mut transcript = SegmentTranscript {
                    index,
                    start: segment.start,
                    end: segment.end,
                    text: String::new(),
                };
                let outcome = outcome.map(|text| transcript.text = text);
                (pos, transcript, outcome)
            });
        }

        if set.is_empty() {
            break;
        }

        let Some(joined) = set.join_next().await else {
            break;
        };
        match joined {
            Ok((pos, transcript, Ok(()))) => {
                states[pos] = SegmentState::Done;
                results[pos] = Some(transcript);
                done += 1;
                observer.segment_finished(done, total);
            }
            Ok((pos, transcript, Err(exhausted))) => {
                states[pos] = SegmentState::Failed;
                tracing::warn!(segment = transcript.index, "segment failed: {}", exhausted);
                if failure.is_none() {
                    failure = Some(DispatchError::SegmentFailed {
                        index: transcript.index,
                        attempts: exhausted.attempts,
                        source: exhausted.error,
                    });
                }
            }
            Err(join_err) => {
                if failure.is_none() {
                    failure = Some(DispatchError::Internal(join_err.to_string()));
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(DispatchError::Cancelled { completed: done });
    }
    if let Some(err) = failure {
        return Err(err);
    }
    debug_assert!(states.iter().all(|s| *s == SegmentState::Done));
    Ok(results.into_iter().flatten().collect())
}
