//! Fixed-size worker pool over the job queue.
//!
//! Keeps up to `workers` jobs in flight; when one finishes, the next queued
//! job is claimed. Each job runs under a supervisor that turns every way a
//! job can end (including a panic) into a terminal transition.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::execute::{JobOutcome, JobRunner};
use super::queue::JobQueue;
use crate::job_db::{ErrorCode, JobError, JobId, JobStatus};
use crate::job_store::{StoreError, Transition};

pub struct WorkerPool {
    runner: Arc<JobRunner>,
    queue: Arc<JobQueue>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(runner: Arc<JobRunner>, queue: Arc<JobQueue>, workers: usize) -> Self {
        Self {
            runner,
            queue,
            workers: workers.max(1),
        }
    }

    /// Run jobs until `shutdown` fires, or, with `until_idle`, until the
    /// queue is empty and no job is in flight. Jobs already running when
    /// shutdown fires are allowed to finish. Returns the number of jobs run.
    pub async fn run(&self, shutdown: CancellationToken, until_idle: bool) -> Result<u32> {
        let store = Arc::clone(self.runner.store());
        let mut join_set: JoinSet<()> = JoinSet::new();
        let mut run_count = 0u32;

        loop {
            while join_set.len() < self.workers && !shutdown.is_cancelled() {
                let Some(job_id) = self.queue.pop() else {
                    break;
                };
                match store.claim(&job_id).await {
                    Ok(true) => {
                        tracing::info!(job_id = %job_id, "job claimed");
                        join_set.spawn(supervise(Arc::clone(&self.runner), job_id));
                    }
                    Ok(false) => tracing::debug!(job_id = %job_id, "skipping job that is no longer queued"),
                    Err(StoreError::NotFound(_)) => tracing::debug!(job_id = %job_id, "skipping removed job"),
                    Err(e) => tracing::warn!(job_id = %job_id, "claim failed: {e}"),
                }
            }

            if join_set.is_empty() && (shutdown.is_cancelled() || (until_idle && self.queue.is_empty())) {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled(), if !shutdown.is_cancelled() => {}
                Some(res) = join_set.join_next(), if !join_set.is_empty() => {
                    run_count += 1;
                    if let Err(e) = res {
                        tracing::error!("job supervisor task failed: {e}");
                    }
                }
                _ = self.queue.notified(), if join_set.len() < self.workers && !shutdown.is_cancelled() => {}
            }
        }

        Ok(run_count)
    }
}

/// Run one claimed job in its own task and record how it ended.
async fn supervise(runner: Arc<JobRunner>, job_id: JobId) {
    let store = Arc::clone(runner.store());
    let task = {
        let runner = Arc::clone(&runner);
        let job_id = job_id.clone();
        tokio::spawn(async move { runner.run_job(&job_id).await })
    };

    let mut produced = None;
    let transition = match task.await {
        Ok(Ok(JobOutcome::Done(output))) => {
            produced = Some(output.path.clone());
            Transition::Complete(output)
        }
        Ok(Ok(JobOutcome::Cancelled)) => Transition::Cancel,
        Ok(Err(failure)) => {
            tracing::warn!(job_id = %job_id, code = failure.code.as_str(), "job failed: {}", failure.message);
            Transition::Fail(failure.into())
        }
        Err(join_err) => {
            tracing::error!(job_id = %job_id, "job worker crashed: {join_err}");
            Transition::Fail(JobError::new(
                ErrorCode::WorkerFault,
                format!("worker crashed: {join_err}"),
            ))
        }
    };

    match store.transition(&job_id, transition).await {
        Ok(JobStatus::Cancelled) => {
            if let Some(path) = produced {
                let _ = std::fs::remove_file(path);
            }
            tracing::info!("job {} cancelled", job_id);
        }
        Ok(status) => tracing::info!("job {} finished: {}", job_id, status),
        Err(StoreError::IllegalTransition { from, to }) => {
            // Typically orphaned by the heartbeat monitor while still working.
            tracing::warn!(job_id = %job_id, "job already {from}; dropping {to} result");
        }
        Err(e) => tracing::error!(job_id = %job_id, "could not record job result: {e}"),
    }
}
