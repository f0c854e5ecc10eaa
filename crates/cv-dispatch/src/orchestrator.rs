//! Save / Load / Delete over a chunk store, one pool job per chunk
//!
//! Per batch: `new_batch` → submit every job → wait for the completion
//! event → either the assembled result or a [`ComposedError`] naming every
//! failed identifier. Batches are never retried.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use cv_chunks::{chunk_id, Checksum};
use cv_core::{Expiry, Permission, RequestId};
use cv_storage::{ChunkStore, ObjectMeta};

use crate::context::DispatchContext;
use crate::error::{ComposedError, DispatchError, DispatchResult, ItemFailure};
use crate::job::{chunk_job_fn, ChunkJob, ChunkOp};
use crate::pool::{Job, JobFn};
use crate::tracker::{CompletionHandle, ItemStatus, ProgressFn, RequestTracker};

pub struct Orchestrator {
    ctx: Arc<DispatchContext>,
    store: Arc<dyn ChunkStore>,
    job: JobFn<ChunkJob>,
    progress: Option<ProgressFn>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<DispatchContext>, store: Arc<dyn ChunkStore>) -> Self {
        Self {
            ctx,
            store,
            job: chunk_job_fn(),
            progress: None,
        }
    }

    /// Observe per-chunk progress of every batch this orchestrator runs
    pub fn with_progress(mut self, observer: ProgressFn) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Upload `chunks` under identifiers derived from `name`, position, and
    /// the whole-stream checksum. Returns the identifiers in chunk order.
    pub async fn save(
        &self,
        name: &str,
        chunks: Vec<Vec<u8>>,
        checksum: &Checksum,
        expiry: Option<Expiry>,
        permission: Option<Permission>,
    ) -> DispatchResult<Vec<String>> {
        self.save_as(RequestId::random(), name, chunks, checksum, expiry, permission)
            .await
    }

    pub async fn save_as(
        &self,
        request_id: RequestId,
        name: &str,
        chunks: Vec<Vec<u8>>,
        checksum: &Checksum,
        expiry: Option<Expiry>,
        permission: Option<Permission>,
    ) -> DispatchResult<Vec<String>> {
        let ids: Vec<String> = (0..chunks.len())
            .map(|index| chunk_id(name, index, checksum))
            .collect();
        if let Some(at) = expiry.filter(Expiry::is_past) {
            warn!(name, expiry = at.0, "uploading chunks whose expiry has already passed");
        }
        let meta = ObjectMeta { expiry, permission };
        let ops = chunks
            .into_iter()
            .map(|data| ChunkOp::Upload {
                data,
                meta: meta.clone(),
            })
            .collect();

        self.execute(request_id, &ids, ops).await?;
        Ok(ids)
    }

    /// Download every identifier and return the chunks in the order of `ids`,
    /// whatever order the downloads finished in.
    pub async fn load(&self, ids: &[String]) -> DispatchResult<Vec<Vec<u8>>> {
        self.load_as(RequestId::random(), ids).await
    }

    pub async fn load_as(
        &self,
        request_id: RequestId,
        ids: &[String],
    ) -> DispatchResult<Vec<Vec<u8>>> {
        let (unique, positions) = dedupe(ids);
        let ops = unique.iter().map(|_| ChunkOp::Download).collect();
        let statuses = match self.execute(request_id, &unique, ops).await {
            Ok(statuses) => statuses,
            Err(DispatchError::Composed(mut composed)) => {
                composed.partial = scatter(std::mem::take(&mut composed.partial), &positions);
                return Err(composed.into());
            }
            Err(e) => return Err(e),
        };

        let data = statuses.into_iter().map(|s| s.data).collect();
        Ok(scatter(data, &positions)
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect())
    }

    /// Delete every identifier. Failures are collected, not short-circuited.
    pub async fn delete(&self, ids: &[String]) -> DispatchResult<()> {
        self.delete_as(RequestId::random(), ids).await
    }

    pub async fn delete_as(&self, request_id: RequestId, ids: &[String]) -> DispatchResult<()> {
        let (unique, _) = dedupe(ids);
        let ops = unique.iter().map(|_| ChunkOp::Delete).collect();
        self.execute(request_id, &unique, ops).await?;
        Ok(())
    }

    async fn execute(
        &self,
        request_id: RequestId,
        ids: &[String],
        ops: Vec<ChunkOp>,
    ) -> DispatchResult<Vec<ItemStatus>> {
        let tracker = self.ctx.tracker();
        let batch = tracker.new_batch_observed(request_id.clone(), ids.len(), self.progress.clone())?;
        let _guard = BatchGuard {
            tracker,
            request_id: &request_id,
        };

        let op_name = ops.first().map_or("noop", ChunkOp::name);
        info!(
            request_id = %request_id,
            op = op_name,
            items = ids.len(),
            backend = self.store.kind(),
            "batch started"
        );

        for (item, (id, op)) in ids.iter().zip(ops).enumerate() {
            let job = ChunkJob {
                id: id.clone(),
                op,
                store: self.store.clone(),
                handle: CompletionHandle::new(batch.clone(), item),
            };
            self.ctx
                .pool()
                .send_job(Job::new(self.job.clone(), job))
                .await?;
        }

        batch.wait(self.ctx.batch_timeout()).await?;

        let statuses = batch.take_statuses();
        let failures: Vec<ItemFailure> = ids
            .iter()
            .zip(&statuses)
            .filter_map(|(id, status)| {
                status.error.as_ref().map(|e| ItemFailure {
                    id: id.clone(),
                    kind: e.kind,
                    cause: e.message.clone(),
                })
            })
            .collect();

        if failures.is_empty() {
            info!(request_id = %request_id, op = op_name, items = ids.len(), "batch succeeded");
            return Ok(statuses);
        }

        let mut succeeded = Vec::with_capacity(ids.len() - failures.len());
        let mut partial = Vec::with_capacity(ids.len());
        for (id, status) in ids.iter().zip(statuses) {
            if status.error.is_none() {
                succeeded.push(id.clone());
            }
            partial.push(status.data);
        }
        info!(
            request_id = %request_id,
            op = op_name,
            failed = failures.len(),
            succeeded = succeeded.len(),
            "batch partially failed"
        );
        Err(ComposedError {
            request_id: request_id.clone(),
            failures,
            succeeded,
            partial,
        }
        .into())
    }
}

/// Frees the request id when the call returns, however it returns.
struct BatchGuard<'a> {
    tracker: &'a RequestTracker,
    request_id: &'a RequestId,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.request_id);
    }
}

/// Spread per-unique-id payloads back over the requested positions, moving
/// each payload into its last position and cloning it into the others.
fn scatter(mut data: Vec<Option<Vec<u8>>>, positions: &[usize]) -> Vec<Option<Vec<u8>>> {
    let mut remaining = vec![0usize; data.len()];
    for &u in positions {
        remaining[u] += 1;
    }
    positions
        .iter()
        .map(|&u| {
            remaining[u] -= 1;
            if remaining[u] == 0 {
                data[u].take()
            } else {
                data[u].clone()
            }
        })
        .collect()
}

/// Unique ids in first-seen order, and for each input position the index of
/// its unique id.
fn dedupe(ids: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(ids.len());
    let mut unique = Vec::with_capacity(ids.len());
    let positions = ids
        .iter()
        .map(|id| {
            *index.entry(id.as_str()).or_insert_with(|| {
                unique.push(id.clone());
                unique.len() - 1
            })
        })
        .collect();
    (unique, positions)
}
