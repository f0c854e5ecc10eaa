//! The backend contract seen by callers of the dispatch layer

use async_trait::async_trait;

use cv_chunks::Checksum;
use cv_core::{Expiry, Permission};

use crate::error::DispatchResult;
use crate::orchestrator::Orchestrator;

/// Whole-file chunk operations: every call covers all chunks of one file
/// and either succeeds for all of them or reports every failure.
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    async fn save_chunks(
        &self,
        name: &str,
        chunks: Vec<Vec<u8>>,
        checksum: &Checksum,
        expiry: Option<Expiry>,
        permission: Option<Permission>,
    ) -> DispatchResult<Vec<String>>;

    async fn retrieve_chunks(&self, ids: &[String]) -> DispatchResult<Vec<Vec<u8>>>;

    async fn delete_chunks(&self, ids: &[String]) -> DispatchResult<()>;
}

#[async_trait]
impl ChunkBackend for Orchestrator {
    async fn save_chunks(
        &self,
        name: &str,
        chunks: Vec<Vec<u8>>,
        checksum: &Checksum,
        expiry: Option<Expiry>,
        permission: Option<Permission>,
    ) -> DispatchResult<Vec<String>> {
        self.save(name, chunks, checksum, expiry, permission).await
    }

    async fn retrieve_chunks(&self, ids: &[String]) -> DispatchResult<Vec<Vec<u8>>> {
        self.load(ids).await
    }

    async fn delete_chunks(&self, ids: &[String]) -> DispatchResult<()> {
        self.delete(ids).await
    }
}
