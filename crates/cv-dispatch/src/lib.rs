//! cv-dispatch: turning many independent chunk transfers into one call
//!
//! - [`WorkerPool`]: fixed workers pulling typed jobs off a bounded queue
//! - [`RequestTracker`]: per-request batch completion and error aggregation
//! - [`Orchestrator`]: assigns chunk identifiers, fans jobs out to the pool,
//!   waits for the batch, and reassembles or reports every failure

pub mod backend;
pub mod context;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod tracker;

pub use backend::ChunkBackend;
pub use context::DispatchContext;
pub use error::{ComposedError, DispatchError, DispatchResult, FailureKind, ItemError, ItemFailure};
pub use job::{chunk_job_fn, run_chunk_job, ChunkJob, ChunkOp};
pub use orchestrator::Orchestrator;
pub use pool::{Job, JobFailure, JobFn, PoolConfig, PoolStats, WorkerPool};
pub use tracker::{
    Batch, CompletionHandle, ItemResult, ItemStatus, Progress, ProgressFn, RequestTracker,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
