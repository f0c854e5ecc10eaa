//! Explicit dispatch context: one pool, one tracker, shared by orchestrators

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cv_core::config::DispatchConfig;

use crate::error::DispatchResult;
use crate::job::ChunkJob;
use crate::pool::{PoolConfig, WorkerPool};
use crate::tracker::RequestTracker;

pub struct DispatchContext {
    pool: WorkerPool<ChunkJob>,
    tracker: RequestTracker,
    batch_timeout: Option<Duration>,
    error_log: Option<JoinHandle<()>>,
}

impl DispatchContext {
    /// Start a running pool. Must be called inside a Tokio runtime.
    pub fn new(pool: PoolConfig, batch_timeout: Option<Duration>) -> DispatchResult<Self> {
        let pool = WorkerPool::new(pool);
        let error_log = pool.take_errors().map(|mut errors| {
            tokio::spawn(async move {
                while let Some(failure) = errors.recv().await {
                    if failure.panicked {
                        warn!(worker = failure.worker, reason = %failure.reason, "job panicked");
                    } else {
                        debug!(worker = failure.worker, reason = %failure.reason, "job failed");
                    }
                }
            })
        });
        pool.run()?;

        Ok(Self {
            pool,
            tracker: RequestTracker::new(),
            batch_timeout,
            error_log,
        })
    }

    pub fn from_config(cfg: &DispatchConfig) -> DispatchResult<Self> {
        Self::new(PoolConfig::from(cfg), cfg.batch_timeout())
    }

    pub fn pool(&self) -> &WorkerPool<ChunkJob> {
        &self.pool
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout
    }

    /// Finish in-flight jobs and stop the workers.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

impl Drop for DispatchContext {
    fn drop(&mut self) {
        if let Some(handle) = self.error_log.take() {
            handle.abort();
        }
    }
}
