//! Bounded worker pool with pull-based dispatch
//!
//! ```text
//! send_job ─► [queue: Q] ─► dispatcher ─► next idle worker ─► func(arg)
//!                               ▲                 │
//!                               └── available ◄───┘  (re-registers when idle)
//! ```
//!
//! Workers advertise their private job slot on a shared "available"
//! channel whenever they go idle, so a slow job never holds up the queue
//! behind it. There is no ordering between concurrently submitted jobs.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::lock;

/// The function half of a job. Argument types are fixed per pool, so a job
/// can never receive an argument of the wrong shape.
pub type JobFn<A> = Arc<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`JobFn`].
pub fn job_fn<A, F, Fut>(f: F) -> JobFn<A>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |arg| f(arg).boxed())
}

pub struct Job<A> {
    func: JobFn<A>,
    arg: A,
}

impl<A> Job<A> {
    pub fn new(func: JobFn<A>, arg: A) -> Self {
        Self { func, arg }
    }
}

/// One failed job, as reported on the pool's error channel
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub worker: usize,
    pub reason: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub error_channel_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 12,
            queue_size: 50,
            error_channel_size: 256,
        }
    }
}

impl From<&cv_core::config::DispatchConfig> for PoolConfig {
    fn from(cfg: &cv_core::config::DispatchConfig) -> Self {
        Self {
            workers: cfg.worker_count(),
            queue_size: cfg.queue_size,
            error_channel_size: cfg.error_channel_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successfully completed jobs, indexed by worker
    pub completed_per_worker: Vec<u64>,
    pub failed: u64,
}

impl PoolStats {
    pub fn total_completed(&self) -> u64 {
        self.completed_per_worker.iter().sum()
    }
}

pub struct WorkerPool<A: Send + 'static> {
    config: PoolConfig,
    queue_tx: mpsc::Sender<Job<A>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Job<A>>>>,
    errors_tx: mpsc::Sender<JobFailure>,
    errors_rx: Mutex<Option<mpsc::Receiver<JobFailure>>>,
    completed: Arc<Vec<AtomicU64>>,
    failed: Arc<AtomicU64>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: Send + 'static> WorkerPool<A> {
    pub fn new(config: PoolConfig) -> Self {
        let config = PoolConfig {
            workers: config.workers.max(1),
            queue_size: config.queue_size.max(1),
            error_channel_size: config.error_channel_size.max(1),
        };
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size);
        let (errors_tx, errors_rx) = mpsc::channel(config.error_channel_size);
        let completed = (0..config.workers).map(|_| AtomicU64::new(0)).collect();

        Self {
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            completed: Arc::new(completed),
            failed: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start the workers and the dispatcher. Jobs queued before `run` are
    /// picked up as soon as it is called.
    pub fn run(&self) -> DispatchResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::PoolClosed);
        }
        let queue_rx = lock(&self.queue_rx)
            .take()
            .ok_or(DispatchError::AlreadyRunning)?;

        let (available_tx, available_rx) = mpsc::channel(self.config.workers);
        let mut handles = lock(&self.handles);
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                available: available_tx.clone(),
                failures: self.errors_tx.clone(),
                completed: self.completed.clone(),
                failed: self.failed.clone(),
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        drop(available_tx);
        handles.push(tokio::spawn(dispatch_loop(
            queue_rx,
            available_rx,
            self.cancel.clone(),
        )));

        info!(
            workers = self.config.workers,
            queue = self.config.queue_size,
            "worker pool running"
        );
        Ok(())
    }

    /// Enqueue a job, waiting while the queue is full.
    pub async fn send_job(&self, job: Job<A>) -> DispatchResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::PoolClosed);
        }
        self.queue_tx
            .send(job)
            .await
            .map_err(|_| DispatchError::PoolClosed)
    }

    /// Enqueue a job without waiting; fails with `QueueFull` under backpressure.
    pub fn try_send_job(&self, job: Job<A>) -> DispatchResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::PoolClosed);
        }
        self.queue_tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Closed(_) => DispatchError::PoolClosed,
        })
    }

    /// The receiving end of the failure channel. Only the first call gets it.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<JobFailure>> {
        lock(&self.errors_rx).take()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed_per_worker: self
                .completed
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop accepting work, let in-flight jobs finish, and wait for every
    /// worker and the dispatcher to exit. Jobs still queued are dropped.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "pool task ended abnormally");
            }
        }
        // never-run pools still own their queue
        drop(lock(&self.queue_rx).take());

        let stats = self.stats();
        info!(
            completed = stats.total_completed(),
            failed = stats.failed,
            "worker pool closed"
        );
    }
}

impl<A: Send + 'static> Drop for WorkerPool<A> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker<A> {
    id: usize,
    available: mpsc::Sender<mpsc::Sender<Job<A>>>,
    failures: mpsc::Sender<JobFailure>,
    completed: Arc<Vec<AtomicU64>>,
    failed: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<A: Send + 'static> Worker<A> {
    async fn run(self) {
        let (slot_tx, mut slot_rx) = mpsc::channel::<Job<A>>(1);
        loop {
            if self.available.send(slot_tx.clone()).await.is_err() {
                break;
            }
            let job = tokio::select! {
                biased;
                job = slot_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            };
            self.execute(job).await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn execute(&self, job: Job<A>) {
        let Job { func, arg } = job;
        let outcome = AssertUnwindSafe(async move { func(arg).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.completed[self.id].fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => self.report(format!("{e:#}"), false),
            Err(payload) => self.report(panic_message(&*payload), true),
        }
    }

    fn report(&self, reason: String, panicked: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let failure = JobFailure {
            worker: self.id,
            reason,
            panicked,
        };
        match self.failures.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(f)) => warn!(
                worker = self.id,
                reason = %f.reason,
                "error channel full, dropping failure report"
            ),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

async fn dispatch_loop<A: Send + 'static>(
    mut queue: mpsc::Receiver<Job<A>>,
    mut available: mpsc::Receiver<mpsc::Sender<Job<A>>>,
    cancel: CancellationToken,
) {
    'jobs: loop {
        let mut job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        loop {
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'jobs,
                slot = available.recv() => match slot {
                    Some(slot) => slot,
                    None => break 'jobs,
                },
            };
            match slot.send(job).await {
                Ok(()) => break,
                // that worker is gone; hand the job to the next one
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }
    }
    debug!("dispatcher stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    fn config(workers: usize, queue_size: usize, error_channel_size: usize) -> PoolConfig {
        PoolConfig {
            workers,
            queue_size,
            error_channel_size,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_every_job() {
        let pool = WorkerPool::new(config(8, 16, 8));
        pool.run().unwrap();

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let func = job_fn(move |n: usize| {
            let done_tx = done_tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis((n % 5) as u64)).await;
                done_tx.send(n).ok();
                Ok(())
            }
        });
        for n in 0..100 {
            pool.send_job(Job::new(func.clone(), n)).await.unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 100 {
            seen.push(done_rx.recv().await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());

        pool.close().await;
        let stats = pool.stats();
        assert_eq!(stats.total_completed(), 100);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.completed_per_worker.len(), 8);
    }

    #[tokio::test]
    async fn test_failures_are_reported_once_and_worker_continues() {
        let pool = WorkerPool::new(config(1, 8, 8));
        let mut errors = pool.take_errors().unwrap();
        pool.run().unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_job = ran.clone();
        let func = job_fn(move |kind: &'static str| {
            let ran = ran_in_job.clone();
            async move {
                match kind {
                    "error" => anyhow::bail!("backend refused"),
                    "panic" => panic!("bad job"),
                    _ => {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
        });

        for kind in ["error", "panic", "ok", "ok"] {
            pool.send_job(Job::new(func.clone(), kind)).await.unwrap();
        }

        let first = errors.recv().await.unwrap();
        assert!(!first.panicked);
        assert!(first.reason.contains("backend refused"));
        let second = errors.recv().await.unwrap();
        assert!(second.panicked);
        assert!(second.reason.contains("bad job"));

        pool.close().await;
        assert_eq!(ran.load(Ordering::SeqCst), 2, "worker survived both failures");
        let stats = pool.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.total_completed(), 2);
        assert!(errors.try_recv().is_err(), "each failure reported exactly once");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_job_does_not_block_idle_worker() {
        let pool = WorkerPool::new(config(2, 4, 4));
        pool.run().unwrap();

        let gate = Arc::new(Notify::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let gate_in_job = gate.clone();
        let func = job_fn(move |slow: bool| {
            let gate = gate_in_job.clone();
            let done_tx = done_tx.clone();
            async move {
                if slow {
                    gate.notified().await;
                }
                done_tx.send(slow).ok();
                Ok(())
            }
        });

        pool.send_job(Job::new(func.clone(), true)).await.unwrap();
        pool.send_job(Job::new(func.clone(), false)).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(false), "fast job finished while slow one waits");

        gate.notify_one();
        assert_eq!(done_rx.recv().await, Some(true));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_try_send_reports_backpressure() {
        let pool: WorkerPool<u8> = WorkerPool::new(config(1, 2, 1));
        let func = job_fn(|_n: u8| async { Ok(()) });

        pool.try_send_job(Job::new(func.clone(), 1)).unwrap();
        pool.try_send_job(Job::new(func.clone(), 2)).unwrap();
        assert!(matches!(
            pool.try_send_job(Job::new(func.clone(), 3)),
            Err(DispatchError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_run_twice_and_send_after_close() {
        let pool: WorkerPool<u8> = WorkerPool::new(config(2, 2, 2));
        pool.run().unwrap();
        assert!(matches!(pool.run(), Err(DispatchError::AlreadyRunning)));

        pool.close().await;
        assert!(pool.is_closed());
        let func = job_fn(|_n: u8| async { Ok(()) });
        assert!(matches!(
            pool.send_job(Job::new(func.clone(), 1)).await,
            Err(DispatchError::PoolClosed)
        ));
        assert!(matches!(pool.run(), Err(DispatchError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_full_error_channel_never_blocks_workers() {
        let pool = WorkerPool::new(config(1, 8, 1));
        let mut errors = pool.take_errors().unwrap();
        pool.run().unwrap();

        let func = job_fn(|n: u32| async move { Err(anyhow::anyhow!("failure {n}")) });
        for n in 0..3 {
            pool.send_job(Job::new(func.clone(), n)).await.unwrap();
        }
        // close() drops queued jobs, so let all three run first
        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.stats().failed < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("all three jobs ran");
        pool.close().await;

        assert_eq!(pool.stats().failed, 3);
        assert!(errors.recv().await.is_some());
        assert!(errors.try_recv().is_err(), "overflowing reports were dropped");
    }

    #[test]
    fn test_config_from_dispatch_section() {
        let cfg = cv_core::config::DispatchConfig {
            workers: 3,
            queue_size: 7,
            ..Default::default()
        };
        let pc = PoolConfig::from(&cfg);
        assert_eq!(pc.workers, 3);
        assert_eq!(pc.queue_size, 7);
    }
}
