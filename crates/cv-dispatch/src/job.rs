//! Chunk-level jobs run on the worker pool

use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

use cv_storage::{ChunkStore, ObjectMeta};

use crate::error::ItemError;
use crate::pool::JobFn;
use crate::tracker::CompletionHandle;

#[derive(Debug)]
pub enum ChunkOp {
    Upload { data: Vec<u8>, meta: ObjectMeta },
    Download,
    Delete,
}

impl ChunkOp {
    pub fn name(&self) -> &'static str {
        match self {
            ChunkOp::Upload { .. } => "upload",
            ChunkOp::Download => "download",
            ChunkOp::Delete => "delete",
        }
    }
}

/// One chunk transfer plus the handle that reports its outcome to the batch
pub struct ChunkJob {
    pub id: String,
    pub op: ChunkOp,
    pub store: Arc<dyn ChunkStore>,
    pub handle: CompletionHandle,
}

/// Run one chunk transfer and settle its batch item.
///
/// A backend failure is recorded on the batch and also returned, so the
/// pool reports it on its error channel.
pub async fn run_chunk_job(job: ChunkJob) -> anyhow::Result<()> {
    let ChunkJob {
        id,
        op,
        store,
        handle,
    } = job;
    let op_name = op.name();
    let item = handle.item();

    let result = match op {
        ChunkOp::Upload { data, meta } => store.put(&id, data, &meta).await.map(|()| None),
        ChunkOp::Download => store.get(&id).await.map(Some),
        ChunkOp::Delete => store.delete(&id).await.map(|()| None),
    };

    match result {
        Ok(data) => {
            debug!(
                op = op_name,
                chunk = item,
                id = %id,
                bytes = data.as_ref().map_or(0, Vec::len),
                "chunk job done"
            );
            handle.succeed(data);
            Ok(())
        }
        Err(e) => {
            debug!(op = op_name, chunk = item, id = %id, error = %e, "chunk job failed");
            handle.fail(ItemError::from(&e));
            Err(anyhow::Error::new(e).context(format!("{op_name} chunk {id}")))
        }
    }
}

/// The pool function for chunk jobs
pub fn chunk_job_fn() -> JobFn<ChunkJob> {
    Arc::new(|job| run_chunk_job(job).boxed())
}
