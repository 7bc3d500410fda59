//! Service facade: submission, status polling, cancellation and the
//! background loops that execute jobs.
//!
//! One `Studio` owns the job store, the queue and the worker pool of a
//! process. The CLI builds one per invocation; `run` drives it until the
//! queue drains, while `start` keeps it serving until shutdown.

mod config_view;
mod submit;

pub use config_view::{ConfigView, OptionRanges};
pub use submit::{SubmitError, SubmitRequest};

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{DeepgramTranscriber, Transcriber};
use crate::cleanup::CleanupSweeper;
use crate::config::StudioConfig;
use crate::frontend::{AudioFrontEnd, WavFrontEnd};
use crate::heartbeat::HeartbeatMonitor;
use crate::job_db::{JobDb, JobSummary};
use crate::job_store::{CancelOutcome, JobStore, StatusView, StoreError, StoreLimits};
use crate::scheduler::{self, JobQueue, JobRunner, RecoveryReport, RunnerSettings, WorkerPool};
use crate::storage::StorageLayout;

pub struct Studio {
    cfg: StudioConfig,
    store: Arc<JobStore>,
    queue: Arc<JobQueue>,
    layout: StorageLayout,
    runner: Arc<JobRunner>,
    backend: Arc<dyn Transcriber>,
    frontend: Arc<dyn AudioFrontEnd>,
}

impl Studio {
    /// Open the default job database and wire up the production backend
    /// and WAV front end.
    pub async fn open(cfg: StudioConfig) -> Result<Self> {
        let db = JobDb::open_default().await?;
        let layout = StorageLayout::from_config(&cfg)?;
        let backend: Arc<dyn Transcriber> = Arc::new(DeepgramTranscriber::from_config(&cfg));
        let frontend: Arc<dyn AudioFrontEnd> = Arc::new(WavFrontEnd);
        Self::with_parts(cfg, db, layout, backend, frontend).await
    }

    /// Assemble a studio from explicit parts (tests, embedding).
    pub async fn with_parts(
        cfg: StudioConfig,
        db: JobDb,
        layout: StorageLayout,
        backend: Arc<dyn Transcriber>,
        frontend: Arc<dyn AudioFrontEnd>,
    ) -> Result<Self> {
        let store = Arc::new(JobStore::open(db, StoreLimits::from(&cfg.store)).await?);
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&frontend),
            layout.clone(),
            RunnerSettings::from_config(&cfg),
        ));
        Ok(Self {
            cfg,
            store,
            queue: Arc::new(JobQueue::new()),
            layout,
            runner,
            backend,
            frontend,
        })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn settings(&self) -> &StudioConfig {
        &self.cfg
    }

    /// Requeue work left over from a previous process. Call before running.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        scheduler::recover(&self.store, &self.queue).await
    }

    /// Incremental status: log lines with `seq > since_seq`.
    pub fn status(&self, id: &str, since_seq: u64) -> Option<StatusView> {
        self.store.status(id, since_seq)
    }

    pub fn list(&self) -> Vec<JobSummary> {
        self.store.list()
    }

    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, StoreError> {
        let outcome = self.store.request_cancel(id).await?;
        tracing::info!(job_id = %id, "cancel: {:?}", outcome);
        Ok(outcome)
    }

    /// One retention sweep over finished jobs.
    pub async fn cleanup_once(&self) -> Result<usize> {
        self.sweeper().sweep().await
    }

    fn sweeper(&self) -> CleanupSweeper {
        CleanupSweeper::from_config(Arc::clone(&self.store), self.layout.clone(), &self.cfg.cleanup)
    }

    /// Run queued jobs until the queue is empty and no job is in flight,
    /// then flush. `workers` overrides `job_workers`.
    pub async fn run_until_idle(&self, workers: Option<usize>) -> Result<u32> {
        self.drain_queue(workers, CancellationToken::new()).await
    }

    /// Like `run_until_idle`, but stops claiming new jobs once `shutdown`
    /// fires. Jobs already running still finish.
    pub async fn drain_queue(&self, workers: Option<usize>, shutdown: CancellationToken) -> Result<u32> {
        let inner = CancellationToken::new();
        let background = self.spawn_background(&inner, false);
        let pool = WorkerPool::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.queue),
            workers.unwrap_or(self.cfg.job_workers),
        );
        let result = pool.run(shutdown, true).await;
        inner.cancel();
        for handle in background {
            let _ = handle.await;
        }
        self.store.flush_dirty().await?;
        result
    }

    /// Serve until `shutdown` fires: workers, flusher, heartbeat monitor and
    /// (when enabled) the cleanup sweeper. Jobs in flight at shutdown finish.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<Result<u32>> {
        let studio = Arc::clone(self);
        tokio::spawn(async move {
            // Background loops outlive `shutdown` until in-flight jobs are done.
            let inner = CancellationToken::new();
            let background = studio.spawn_background(&inner, studio.cfg.cleanup.enabled);
            let pool = WorkerPool::new(
                Arc::clone(&studio.runner),
                Arc::clone(&studio.queue),
                studio.cfg.job_workers,
            );
            let result = pool.run(shutdown, false).await;
            inner.cancel();
            for handle in background {
                let _ = handle.await;
            }
            studio.store.flush_dirty().await?;
            result
        })
    }

    fn spawn_background(&self, shutdown: &CancellationToken, with_cleanup: bool) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            tokio::spawn(Arc::clone(&self.store).run_flusher(self.cfg.flush_interval(), shutdown.clone())),
            Arc::new(HeartbeatMonitor::new(Arc::clone(&self.store), self.cfg.orphan_after())).spawn(shutdown.clone()),
        ];
        if with_cleanup {
            let interval = std::time::Duration::from_secs(self.cfg.cleanup.interval_secs);
            handles.push(Arc::new(self.sweeper()).spawn(interval, shutdown.clone()));
        }
        handles
    }
}
