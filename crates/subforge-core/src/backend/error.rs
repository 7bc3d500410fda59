//! Backend call error type for retry classification.

/// Error returned by a single backend call. Kept typed (not anyhow) so the
/// retry layer can classify it before it becomes a job failure message.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u32, body: String },
    /// 2xx response whose body is not the expected JSON.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Backend signalled a temporary condition; retried.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Backend refused this input for good; not retried.
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("backend credentials are not configured")]
    NotConfigured,
    /// The blocking request task panicked or was cancelled.
    #[error("backend task failed: {0}")]
    Task(String),
}
