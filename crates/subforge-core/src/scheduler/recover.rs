//! Restart recovery: rebuild the queue from persisted jobs.

use serde::Serialize;

use super::queue::JobQueue;
use crate::job_db::JobStatus;
use crate::job_store::{CancelOutcome, JobStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// `running` jobs of dead runners moved back to `queued`.
    pub requeued: usize,
    /// Jobs with a pending cancel request, now `cancelled`.
    pub cancelled: usize,
    /// Jobs pushed onto the queue (includes `requeued`).
    pub queued: usize,
    /// `running` jobs left alone because their runner is still alive.
    pub leased: usize,
}

/// Put every resumable job back in line, oldest first.
///
/// A `running` job is only taken back when the runner that claimed it no
/// longer holds its lease; jobs of live runners are skipped. Jobs whose
/// cancel was requested are finished as `cancelled`. Must run before the
/// pool starts claiming.
pub async fn recover(store: &JobStore, queue: &JobQueue) -> Result<RecoveryReport, StoreError> {
    let mut report = RecoveryReport::default();
    for job in store.list_resumable() {
        let mut status = job.status;
        if status == JobStatus::Running {
            match store.release_abandoned(&job.id).await? {
                None => {
                    tracing::debug!(job_id = %job.id, owner = ?job.owner, "job still held by a live runner");
                    report.leased += 1;
                    continue;
                }
                Some(JobStatus::Queued) => {
                    report.requeued += 1;
                    status = JobStatus::Queued;
                }
                Some(JobStatus::Cancelled) => {
                    report.cancelled += 1;
                    continue;
                }
                Some(other) => status = other,
            }
        }
        if status != JobStatus::Queued {
            continue;
        }
        let flagged = store.get(&job.id).is_some_and(|r| r.cancel_requested);
        if flagged {
            if store.request_cancel(&job.id).await? == CancelOutcome::Cancelled {
                report.cancelled += 1;
            }
            continue;
        }
        queue.push(job.id);
        report.queued += 1;
    }
    if report.queued + report.cancelled + report.leased > 0 {
        tracing::info!(
            requeued = report.requeued,
            cancelled = report.cancelled,
            queued = report.queued,
            leased = report.leased,
            "recovered jobs from previous run"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::job_db::db::open_memory;
    use crate::job_db::{JobDb, JobSource};
    use crate::job_store::StoreLimits;
    use crate::options::JobOptions;

    fn source(name: &str) -> JobSource {
        JobSource {
            path: PathBuf::from(format!("/tmp/{name}")),
            original_name: name.into(),
        }
    }

    #[tokio::test]
    async fn running_requeued_cancel_requested_finished() {
        let store = JobStore::open(open_memory().await.unwrap(), StoreLimits::default())
            .await
            .unwrap();
        let opts = JobOptions::build("auto", "nova-2-general", Default::default()).unwrap();
        let a = store.create(source("a.wav"), opts.clone()).await.unwrap();
        let b = store.create(source("b.wav"), opts.clone()).await.unwrap();
        let c = store.create(source("c.wav"), opts).await.unwrap();
        store.claim(&a).await.unwrap();
        store.claim(&b).await.unwrap();
        store.request_cancel(&b).await.unwrap();

        // Same database, fresh process; the first runner is gone.
        let db = store.db().clone();
        drop(store);
        let store = JobStore::open(db, StoreLimits::default()).await.unwrap();
        let queue = JobQueue::new();
        let report = recover(&store, &queue).await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                requeued: 1,
                cancelled: 1,
                queued: 2,
                leased: 0,
            }
        );
        assert_eq!(queue.pop(), Some(a.clone()));
        assert_eq!(queue.pop(), Some(c));
        assert_eq!(store.get(&a).unwrap().status, JobStatus::Queued);
        assert!(store.get(&a).unwrap().heartbeat_at.is_none());
        assert_eq!(store.get(&b).unwrap().status, JobStatus::Cancelled);
        assert!(store.claim(&a).await.unwrap());
        assert_eq!(store.get(&a).unwrap().owner.as_deref(), Some(store.runner_id()));
    }

    #[tokio::test]
    async fn live_runner_keeps_its_jobs_until_it_exits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let first = JobStore::open(JobDb::open_at(&path).await.unwrap(), StoreLimits::default())
            .await
            .unwrap();
        let opts = JobOptions::build("auto", "nova-2-general", Default::default()).unwrap();
        let id = first.create(source("x.wav"), opts).await.unwrap();
        assert!(first.claim(&id).await.unwrap());

        // A second runner on the same file must not steal the live job.
        let second = JobStore::open(JobDb::open_at(&path).await.unwrap(), StoreLimits::default())
            .await
            .unwrap();
        let queue = JobQueue::new();
        let report = recover(&second, &queue).await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.leased, 1);
        assert_eq!(queue.pop(), None);
        assert!(!second.claim(&id).await.unwrap());

        let held = first.get(&id).unwrap();
        assert_eq!(held.status, JobStatus::Running);
        assert_eq!(held.owner.as_deref(), Some(first.runner_id()));
        let row = second.db().load_job(&id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Running);
        assert_eq!(row.owner.as_deref(), Some(first.runner_id()));
        assert!(first.touch_heartbeat(&id).unwrap());
        first.flush(&id).await.unwrap();
        drop(second);

        // Once the first runner exits, the next one takes the job back.
        drop(first);
        let third = JobStore::open(JobDb::open_at(&path).await.unwrap(), StoreLimits::default())
            .await
            .unwrap();
        let report = recover(&third, &queue).await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.leased, 0);
        assert_eq!(queue.pop(), Some(id.clone()));
        assert!(third.claim(&id).await.unwrap());
        let row = third.db().load_job(&id).await.unwrap().unwrap();
        assert_eq!(row.owner.as_deref(), Some(third.runner_id()));
    }
}
