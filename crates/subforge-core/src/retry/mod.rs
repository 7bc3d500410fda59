//! Retry and backoff policy for backend calls.
//!
//! Failures are sorted into transient and permanent kinds; transient ones
//! are retried with capped exponential backoff by the segment dispatcher.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::{run_with_retry, RetryExhausted};
