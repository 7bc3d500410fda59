//! Classify HTTP status, curl errors and backend errors into retry kinds.

use crate::backend::BackendError;
use crate::retry::policy::ErrorKind;

/// Non-2xx answers from the listen endpoint.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 => ErrorKind::Timeout,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Transport failures before a complete response arrived.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    let transient_io = [
        e.is_couldnt_connect(),
        e.is_couldnt_resolve_host(),
        e.is_couldnt_resolve_proxy(),
        e.is_send_error(),
        e.is_recv_error(),
        e.is_read_error(),
        e.is_got_nothing(),
        e.is_partial_file(),
    ];
    if e.is_operation_timedout() {
        ErrorKind::Timeout
    } else if transient_io.contains(&true) {
        ErrorKind::Connection
    } else {
        ErrorKind::Other
    }
}

/// Map one failed `transcribe` call onto a retry kind.
pub fn classify(e: &BackendError) -> ErrorKind {
    match e {
        BackendError::Curl(ce) => classify_curl_error(ce),
        BackendError::Http { status, .. } => classify_http_status(*status),
        BackendError::Unavailable(_) => ErrorKind::Unavailable,
        BackendError::Malformed(_)
        | BackendError::Rejected(_)
        | BackendError::NotConfigured
        | BackendError::Task(_) => ErrorKind::Other,
    }
}
