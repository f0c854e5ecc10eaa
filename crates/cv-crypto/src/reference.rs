//! Reference file: everything needed to fetch, decrypt, and reassemble a file
//!
//! A plain data-transfer object serialized as JSON. Raw key bytes are base64,
//! the checksum is hex, the salt is a fixed 8-element byte array, so every
//! field keeps its exact byte length across a round trip. Semantic checks
//! happen in the codec when the reference is consumed.
//!
//! Losing the reference file makes the uploaded chunks unrecoverable: the
//! backend never holds keys or plaintext metadata.

use serde::{Deserialize, Serialize};
use std::path::Path;

use cv_chunks::Checksum;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::ChunkKey;
use crate::SALT_SIZE;

/// Immutable facts about the source, computed once at encode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Base name of the source file or directory
    pub name: String,
    /// Canonical plaintext size (archive size for directories)
    pub size: u64,
    /// Source mtime as Unix seconds
    pub modified: u64,
    /// Source was a directory (stream is a tar archive)
    pub is_dir: bool,
    /// SHA-384 of the canonical plaintext stream
    pub checksum: Checksum,
}

/// Master-key derivation parameters. `rounds == 0` and `salt == None` when
/// no master passphrase was used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    pub rounds: u32,
    pub salt: Option<[u8; SALT_SIZE]>,
}

impl Derivation {
    pub fn uses_master_key(&self) -> bool {
        self.salt.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub metadata: Metadata,
    pub derivation: Derivation,
    /// One key per chunk, in chunk order
    pub keys: Vec<ChunkKey>,
    /// Backend identifiers, in chunk order
    pub ids: Vec<String>,
    /// Plaintext bytes per chunk used at encode time
    pub chunk_size: usize,
    /// Stream was zstd-compressed before splitting
    pub compressed: bool,
}

impl ReferenceFile {
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Write atomically (temp file + rename).
    pub fn write_to(&self, path: &Path) -> CryptoResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("ref_tmp");
        std::fs::write(&tmp, self.to_bytes()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> CryptoResult<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data).map_err(|e| match e {
            CryptoError::Serialization(e) => {
                CryptoError::InvalidReference(format!("{}: {e}", path.display()))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_chunk_key;

    fn sample() -> ReferenceFile {
        ReferenceFile {
            metadata: Metadata {
                name: "report.pdf".into(),
                size: 10 * 1024,
                modified: 1_700_000_000,
                is_dir: false,
                checksum: cv_chunks::checksum(b"report"),
            },
            derivation: Derivation {
                rounds: 11_234,
                salt: Some([1, 2, 3, 4, 5, 6, 7, 8]),
            },
            keys: vec![generate_chunk_key(), generate_chunk_key()],
            ids: vec!["id-0".into(), "id-1".into()],
            chunk_size: 4096,
            compressed: true,
        }
    }

    #[test]
    fn test_reference_roundtrip_preserves_every_field() {
        let reference = sample();
        let restored = ReferenceFile::from_bytes(&reference.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.metadata, reference.metadata);
        assert_eq!(restored.derivation, reference.derivation);
        assert_eq!(restored.keys, reference.keys);
        assert_eq!(restored.ids, reference.ids);
        assert_eq!(restored.chunk_size, 4096);
        assert!(restored.compressed);
        assert!(restored.derivation.uses_master_key());
    }

    #[test]
    fn test_write_and_read_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("refs/report.ref");
        let reference = sample();

        reference.write_to(&path).unwrap();
        let restored = ReferenceFile::read_from(&path).unwrap();

        assert_eq!(restored.metadata.checksum, reference.metadata.checksum);
        assert!(!path.with_extension("ref_tmp").exists());
    }

    #[test]
    fn test_read_garbage_is_invalid_reference() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.ref");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            ReferenceFile::read_from(&path),
            Err(CryptoError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_no_master_key_derivation() {
        let d = Derivation::default();
        assert!(!d.uses_master_key());
        assert_eq!(d.rounds, 0);
    }
}
