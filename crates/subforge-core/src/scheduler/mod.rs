//! Job scheduler.
//!
//! Admits queued jobs to a fixed number of worker slots and drives each one
//! through the pipeline: speech detection → segment planning → dispatch →
//! subtitle assembly → output. Also restores the queue after a restart.

mod execute;
mod pool;
mod queue;
mod recover;

pub use execute::{JobFailure, JobOutcome, JobRunner, RunnerSettings};
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use recover::{recover, RecoveryReport};
