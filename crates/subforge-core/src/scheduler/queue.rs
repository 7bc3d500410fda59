//! FIFO of job ids waiting for a worker slot.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::job_db::JobId;

#[derive(Default)]
pub struct JobQueue {
    ids: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and wake one waiting pool.
    pub fn push(&self, id: JobId) {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).push_back(id);
        self.notify.notify_one();
    }

    /// Oldest id, if any.
    pub fn pop(&self) -> Option<JobId> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next `push` (or immediately if one happened while
    /// nobody was waiting).
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = JobQueue::new();
        q.push("a".into());
        q.push("b".into());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn push_wakes_waiter() {
        let q = std::sync::Arc::new(JobQueue::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move {
            q2.notified().await;
            q2.pop()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push("x".into());
        let got = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("x"));
    }
}
