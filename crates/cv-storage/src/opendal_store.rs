//! Chunk store over an OpenDAL operator (S3-compatible or in-memory)

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::store::{sidecar_key, ChunkStore, ObjectMeta};

/// Objects are laid out as `{prefix}/chunks/{id}` with a `{id}.meta` sidecar.
#[derive(Debug, Clone)]
pub struct OpendalStore {
    op: Operator,
    prefix: String,
    conditional_writes: bool,
}

impl OpendalStore {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        let conditional_writes = op.info().full_capability().write_with_if_not_exists;
        Self {
            op,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            conditional_writes,
        }
    }

    /// The service rejects a write to an existing key atomically.
    pub fn conditional_writes(&self) -> bool {
        self.conditional_writes
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn key(&self, id: &str) -> String {
        if self.prefix.is_empty() {
            format!("chunks/{id}")
        } else {
            format!("{}/chunks/{id}", self.prefix)
        }
    }

    fn conflict(id: &str, e: opendal::Error) -> StorageError {
        if e.kind() == ErrorKind::ConditionNotMatch {
            StorageError::AlreadyExists(id.to_string())
        } else {
            e.into()
        }
    }

    fn not_found(id: &str, e: opendal::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(id.to_string())
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl ChunkStore for OpendalStore {
    async fn put(&self, id: &str, data: Vec<u8>, meta: &ObjectMeta) -> StorageResult<()> {
        let key = self.key(id);
        let bytes = data.len();
        if self.conditional_writes {
            self.op
                .write_with(&key, data)
                .if_not_exists(true)
                .await
                .map_err(|e| Self::conflict(id, e))?;
        } else {
            // no server-side precondition; best effort check before writing
            if self.op.exists(&key).await? {
                return Err(StorageError::AlreadyExists(id.to_string()));
            }
            self.op.write(&key, data).await?;
        }

        let sidecar = serde_json::to_vec(meta)
            .map_err(|e| StorageError::Backend(format!("encoding metadata: {e}")))?;
        self.op.write(&sidecar_key(&key), sidecar).await?;

        debug!(id, key = %key, bytes, "opendal: stored chunk");
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Vec<u8>> {
        let buf = self
            .op
            .read(&self.key(id))
            .await
            .map_err(|e| Self::not_found(id, e))?;
        Ok(buf.to_vec())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let key = self.key(id);
        // opendal deletes are idempotent; a missing chunk is still reported
        if !self.op.exists(&key).await? {
            return Err(StorageError::NotFound(id.to_string()));
        }
        self.op.delete(&key).await?;
        self.op.delete(&sidecar_key(&key)).await?;
        debug!(id, key = %key, "opendal: deleted chunk");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "opendal"
    }
}
