//! Retry loop: run an async call until success or the policy says stop.

use std::future::Future;
use std::time::Duration;

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::backend::BackendError;

/// Final error of a retried call, with the number of attempts spent.
#[derive(Debug, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub error: BackendError,
}

/// Runs `f(attempt)` until it succeeds or the retry policy says to stop.
/// On retryable failure, calls `on_retry(attempt, &error, delay)`, sleeps for
/// the backoff duration, then tries again.
pub async fn run_with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut f: F,
    mut on_retry: R,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
    R: FnMut(u32, &BackendError, Duration),
{
    let mut attempt = 1u32;
    loop {
        match f(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            error: e,
                        })
                    }
                    RetryDecision::RetryAfter(d) => {
                        on_retry(attempt, &e, d);
                        if !d.is_zero() {
                            tokio::time::sleep(d).await;
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}
