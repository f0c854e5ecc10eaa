//! One file per chunk under a root directory

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::{sidecar_key, ChunkStore, ObjectMeta};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) a chunk directory.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn fill(
        &self,
        file: &mut tokio::fs::File,
        id: &str,
        data: &[u8],
        meta: &ObjectMeta,
    ) -> StorageResult<()> {
        file.write_all(data).await?;
        file.sync_all().await?;
        let sidecar = serde_json::to_vec(meta)
            .map_err(|e| StorageError::Backend(format!("encoding metadata: {e}")))?;
        tokio::fs::write(self.root.join(sidecar_key(id)), sidecar).await?;
        Ok(())
    }

    fn path_for(&self, id: &str) -> StorageResult<PathBuf> {
        if id.is_empty() || id.contains(|c| c == '/' || c == '\\') || id.starts_with('.') {
            return Err(StorageError::Backend(format!("invalid chunk id: {id:?}")));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl ChunkStore for FsStore {
    async fn put(&self, id: &str, data: Vec<u8>, meta: &ObjectMeta) -> StorageResult<()> {
        let path = self.path_for(id)?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        // a half-written chunk would turn every retry into AlreadyExists
        if let Err(e) = self.fill(&mut file, id, &data, meta).await {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(id, error = %rm, "fs: could not remove partial chunk");
            }
            return Err(e);
        }

        debug!(id, bytes = data.len(), "fs: stored chunk");
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        // sidecar is best effort: chunks written by older clients have none
        let _ = tokio::fs::remove_file(self.root.join(sidecar_key(id))).await;
        debug!(id, "fs: deleted chunk");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "fs"
    }
}
