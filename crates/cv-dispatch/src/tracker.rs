//! Per-request batch tracking
//!
//! A [`Batch`] counts settled items under one mutex and flips a `watch`
//! flag exactly once, when the last item settles. Waiters block on that
//! flag instead of polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use cv_core::RequestId;

use crate::error::{DispatchError, DispatchResult, ItemError};
use crate::lock;

/// Outcome of one item: optional payload on success
pub type ItemResult = Result<Option<Vec<u8>>, ItemError>;

/// Called after every settled item
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemStatus {
    pub done: bool,
    pub error: Option<ItemError>,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub done: usize,
    pub errors: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }
}

#[derive(Debug, Default)]
struct BatchState {
    total: usize,
    progress: usize,
    errors: usize,
    items: HashMap<usize, ItemStatus>,
}

pub struct Batch {
    request_id: RequestId,
    state: Mutex<BatchState>,
    complete: watch::Sender<bool>,
    observer: Option<ProgressFn>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("request_id", &self.request_id)
            .field("progress", &self.progress())
            .finish()
    }
}

impl Batch {
    fn new(request_id: RequestId, total: usize, observer: Option<ProgressFn>) -> Self {
        let (complete, _) = watch::channel(total == 0);
        Self {
            request_id,
            state: Mutex::new(BatchState {
                total,
                ..Default::default()
            }),
            complete,
            observer,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Record the status of one item.
    ///
    /// `done` only ever moves from false to true; updates to a settled item
    /// are ignored. Returns `true` for the one call that completes the batch.
    pub fn set_status(&self, item: usize, done: bool, result: ItemResult) -> DispatchResult<bool> {
        let (completed_now, progress) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if item >= state.total {
                return Err(DispatchError::UnexpectedItem {
                    request_id: self.request_id.clone(),
                    item,
                    total: state.total,
                });
            }

            let status = state.items.entry(item).or_default();
            if status.done {
                debug!(request_id = %self.request_id, item, "ignoring update to settled item");
                return Ok(false);
            }

            match result {
                Ok(data) => {
                    if data.is_some() {
                        status.data = data;
                    }
                }
                Err(e) => {
                    if status.error.is_none() {
                        state.errors += 1;
                    }
                    status.error = Some(e);
                }
            }
            status.done = done;
            if done {
                state.progress += 1;
            }

            let progress = Progress {
                total: state.total,
                done: state.progress,
                errors: state.errors,
            };
            (done && progress.is_complete(), progress)
        };

        if done {
            if let Some(observer) = &self.observer {
                observer(progress);
            }
        }
        if completed_now {
            self.complete.send_replace(true);
            debug!(
                request_id = %self.request_id,
                total = progress.total,
                errors = progress.errors,
                "batch complete"
            );
        }
        Ok(completed_now)
    }

    /// True iff every item has settled
    pub fn completed(&self) -> bool {
        *self.complete.borrow()
    }

    pub fn get_status(&self, item: usize) -> Option<ItemStatus> {
        lock(&self.state).items.get(&item).cloned()
    }

    pub fn progress(&self) -> Progress {
        let state = lock(&self.state);
        Progress {
            total: state.total,
            done: state.progress,
            errors: state.errors,
        }
    }

    /// Remove and return every item's status, in item order. Unsettled
    /// items come back as the default status.
    pub fn take_statuses(&self) -> Vec<ItemStatus> {
        let mut state = lock(&self.state);
        let total = state.total;
        (0..total)
            .map(|i| state.items.remove(&i).unwrap_or_default())
            .collect()
    }

    /// Wait until the batch completes, or until `timeout` elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> DispatchResult<()> {
        let mut rx = self.complete.subscribe();
        match timeout {
            None => rx
                .wait_for(|done| *done)
                .await
                .map(|_| ())
                .map_err(|_| DispatchError::PoolClosed),
            Some(limit) => match tokio::time::timeout(limit, rx.wait_for(|done| *done)).await {
                Ok(res) => res.map(|_| ()).map_err(|_| DispatchError::PoolClosed),
                Err(_) => Err(DispatchError::Timeout {
                    request_id: self.request_id.clone(),
                    timeout: limit,
                }),
            },
        }
    }
}

/// Settles one batch item exactly once. Dropping an unsettled handle
/// (job dropped from a closing pool, panicking job) records the item as
/// abandoned so the batch still completes.
pub struct CompletionHandle {
    batch: Arc<Batch>,
    item: usize,
    settled: bool,
}

impl CompletionHandle {
    pub fn new(batch: Arc<Batch>, item: usize) -> Self {
        Self {
            batch,
            item,
            settled: false,
        }
    }

    pub fn item(&self) -> usize {
        self.item
    }

    pub fn succeed(mut self, data: Option<Vec<u8>>) {
        self.settle(Ok(data));
    }

    pub fn fail(mut self, error: ItemError) {
        self.settle(Err(error));
    }

    fn settle(&mut self, result: ItemResult) {
        if self.settled {
            return;
        }
        self.settled = true;
        if let Err(e) = self.batch.set_status(self.item, true, result) {
            warn!(request_id = %self.batch.request_id, item = self.item, error = %e, "could not settle item");
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.settle(Err(ItemError::abandoned()));
    }
}

/// Active batches keyed by request id. At most one batch per id.
#[derive(Default)]
pub struct RequestTracker {
    batches: Mutex<HashMap<RequestId, Arc<Batch>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_batch(&self, request_id: RequestId, total: usize) -> DispatchResult<Arc<Batch>> {
        self.new_batch_observed(request_id, total, None)
    }

    pub fn new_batch_observed(
        &self,
        request_id: RequestId,
        total: usize,
        observer: Option<ProgressFn>,
    ) -> DispatchResult<Arc<Batch>> {
        let mut batches = lock(&self.batches);
        if batches.contains_key(&request_id) {
            return Err(DispatchError::DuplicateRequestId(request_id));
        }
        let batch = Arc::new(Batch::new(request_id.clone(), total, observer));
        batches.insert(request_id, batch.clone());
        Ok(batch)
    }

    pub fn get(&self, request_id: &RequestId) -> Option<Arc<Batch>> {
        lock(&self.batches).get(request_id).cloned()
    }

    /// Stop tracking a batch, freeing its request id
    pub fn finish(&self, request_id: &RequestId) -> Option<Arc<Batch>> {
        lock(&self.batches).remove(request_id)
    }

    pub fn active(&self) -> usize {
        lock(&self.batches).len()
    }

    pub fn set_status(
        &self,
        request_id: &RequestId,
        item: usize,
        done: bool,
        result: ItemResult,
    ) -> DispatchResult<bool> {
        self.require(request_id)?.set_status(item, done, result)
    }

    pub fn completed(&self, request_id: &RequestId) -> DispatchResult<bool> {
        Ok(self.require(request_id)?.completed())
    }

    pub fn get_status(&self, request_id: &RequestId, item: usize) -> DispatchResult<Option<ItemStatus>> {
        Ok(self.require(request_id)?.get_status(item))
    }

    fn require(&self, request_id: &RequestId) -> DispatchResult<Arc<Batch>> {
        self.get(request_id)
            .ok_or_else(|| DispatchError::UnknownRequest(request_id.clone()))
    }
}
