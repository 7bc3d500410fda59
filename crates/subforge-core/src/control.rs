//! Cooperative cancellation for running jobs.
//!
//! Each job entry in the store owns a `CancelToken`. `cancel` requests set it;
//! the worker and the segment dispatcher poll it at their checkpoints and stop
//! dispatching new work once it is set. In-flight backend calls are never
//! interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, clonable cancellation flag. Once set it is never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that starts out cancelled (jobs loaded with `cancel_requested`).
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
