//! The per-object chunk store contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cv_core::{Expiry, Permission};

use crate::error::StorageResult;

/// Hints stored alongside a chunk. Backends that cannot enforce them still
/// record them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub expiry: Option<Expiry>,
    pub permission: Option<Permission>,
}

/// A flat key → ciphertext store.
///
/// `put` must refuse to overwrite: a second `put` under an existing id fails
/// with [`StorageError::AlreadyExists`](crate::StorageError::AlreadyExists).
/// `get`/`delete` of an unknown id fail with
/// [`StorageError::NotFound`](crate::StorageError::NotFound).
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    async fn put(&self, id: &str, data: Vec<u8>, meta: &ObjectMeta) -> StorageResult<()>;

    async fn get(&self, id: &str) -> StorageResult<Vec<u8>>;

    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Short backend name for logs
    fn kind(&self) -> &'static str;
}

/// Object key of the metadata sidecar written next to a chunk.
pub(crate) fn sidecar_key(id: &str) -> String {
    format!("{id}.meta")
}
