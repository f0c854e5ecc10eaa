//! Whole-stream checksum and chunk identifiers
//!
//! The checksum is SHA-384 over the canonical plaintext stream (after
//! archiving, before compression) and is verified byte-for-byte on decode.
//!
//! Chunk identifiers are BLAKE3 over `"{name}-chunk{index}" || checksum`.
//! They depend on name, position, and file checksum but not on the chunk's
//! ciphertext, so the same logical file under the same name always maps to
//! the same identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha384};
use std::fmt;

use crate::error::{ChunkError, ChunkResult};

/// SHA-384 digest length in bytes
pub const CHECKSUM_SIZE: usize = 48;

/// A 384-bit whole-stream checksum, serialized as 96 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_SIZE]);

impl Checksum {
    pub fn from_bytes(bytes: [u8; CHECKSUM_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> ChunkResult<Self> {
        let raw = hex::decode(s).map_err(|e| ChunkError::InvalidChecksum(e.to_string()))?;
        let bytes: [u8; CHECKSUM_SIZE] = raw.try_into().map_err(|v: Vec<u8>| {
            ChunkError::InvalidChecksum(format!(
                "expected {CHECKSUM_SIZE} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Checksum::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Checksum a byte slice in memory.
pub fn checksum(data: &[u8]) -> Checksum {
    let digest = Sha384::digest(data);
    let mut bytes = [0u8; CHECKSUM_SIZE];
    bytes.copy_from_slice(&digest);
    Checksum(bytes)
}

/// Derive the backend identifier of chunk `index` of the file `name`.
pub fn chunk_id(name: &str, index: usize, checksum: &Checksum) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("{name}-chunk{index}").as_bytes());
    hasher.update(checksum.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checksum_is_384_bits() {
        let c = checksum(b"chunkvault");
        assert_eq!(c.as_bytes().len(), 48);
        assert_eq!(c.to_hex().len(), 96);
    }

    #[test]
    fn chunk_ids_depend_on_position_and_name() {
        let c = checksum(b"payload");
        let a0 = chunk_id("a.txt", 0, &c);
        let a1 = chunk_id("a.txt", 1, &c);
        let b0 = chunk_id("b.txt", 0, &c);

        assert_ne!(a0, a1);
        assert_ne!(a0, b0);
        assert_eq!(a0, chunk_id("a.txt", 0, &c), "ids must be deterministic");
        assert_eq!(a0.len(), 64);
    }

    #[test]
    fn chunk_ids_depend_on_checksum() {
        let id1 = chunk_id("a.txt", 0, &checksum(b"one"));
        let id2 = chunk_id("a.txt", 0, &checksum(b"two"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(Checksum::from_hex("abcd").is_err());
        assert!(Checksum::from_hex("zz").is_err());
    }

    #[test]
    fn serde_preserves_exact_bytes() {
        let c = checksum(b"serde");
        let json = serde_json::to_string(&c).unwrap();
        let back: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }

    proptest! {
        #[test]
        fn hex_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=1024)) {
            let c = checksum(&data);
            let back = Checksum::from_hex(&c.to_hex()).unwrap();
            prop_assert_eq!(c, back);
        }
    }
}
