//! Per-chunk keys and XOR key combination

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// A random 256-bit key owned by exactly one chunk. Zeroized on drop.
///
/// Serialized as standard base64 inside the reference file.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkKey {
    bytes: [u8; KEY_SIZE],
}

impl ChunkKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ChunkKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Serialize for ChunkKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.bytes))
    }
}

impl<'de> Deserialize<'de> for ChunkKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        let mut raw = Zeroizing::new(
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom)?,
        );
        if raw.len() != KEY_SIZE {
            return Err(serde::de::Error::custom(format!(
                "chunk key is {} bytes, expected {KEY_SIZE}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self { bytes })
    }
}

/// Generate a random 256-bit chunk key.
pub fn generate_chunk_key() -> ChunkKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ChunkKey::from_bytes(bytes)
}

/// XOR equal-length keys together.
///
/// Every input must be exactly `length` bytes. An empty input yields
/// `length` zero bytes.
pub fn combine_keys(keys: &[&[u8]], length: usize) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; length]);
    for (index, key) in keys.iter().enumerate() {
        if key.len() != length {
            return Err(CryptoError::KeyLengthMismatch {
                index,
                actual: key.len(),
                expected: length,
            });
        }
        for (o, k) in out.iter_mut().zip(key.iter()) {
            *o ^= k;
        }
    }
    Ok(out)
}

/// The AES key actually used for a chunk: its own key, folded with the master
/// key when one is active.
pub fn effective_key(
    chunk_key: &ChunkKey,
    master: Option<&MasterKey>,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
    parts.push(chunk_key.as_bytes());
    if let Some(master) = master {
        parts.push(master.as_bytes());
    }
    let combined = combine_keys(&parts, KEY_SIZE)?;
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&combined);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_generation() {
        let k1 = generate_chunk_key();
        let k2 = generate_chunk_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_combine_is_xor() {
        let a = [0b1010_1010u8; 4];
        let b = [0b0110_0110u8; 4];
        let combined = combine_keys(&[&a[..], &b[..]], 4).unwrap();
        assert_eq!(combined.as_slice(), &[0b1100_1100u8; 4]);
    }

    #[test]
    fn test_combine_twice_restores() {
        let k = [0x5Au8; KEY_SIZE];
        let m = [0xC3u8; KEY_SIZE];
        let once = combine_keys(&[&k[..], &m[..]], KEY_SIZE).unwrap();
        let back = combine_keys(&[once.as_slice(), &m[..]], KEY_SIZE).unwrap();
        assert_eq!(back.as_slice(), &k);
    }

    #[test]
    fn test_combine_length_mismatch() {
        let a = [0u8; KEY_SIZE];
        let b = [0u8; 16];
        let err = combine_keys(&[&a[..], &b[..]], KEY_SIZE).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::KeyLengthMismatch {
                index: 1,
                actual: 16,
                expected: 32
            }
        ));
    }

    #[test]
    fn test_effective_key_without_master_is_chunk_key() {
        let ck = generate_chunk_key();
        let eff = effective_key(&ck, None).unwrap();
        assert_eq!(&*eff, ck.as_bytes());
    }

    #[test]
    fn test_effective_key_with_master_differs() {
        let ck = generate_chunk_key();
        let master = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let eff = effective_key(&ck, Some(&master)).unwrap();
        assert_ne!(&*eff, ck.as_bytes());
    }

    #[test]
    fn test_serde_roundtrip_keeps_exact_bytes() {
        let ck = generate_chunk_key();
        let json = serde_json::to_string(&ck).unwrap();
        let back: ChunkKey = serde_json::from_str(&json).unwrap();
        assert_eq!(ck, back);
    }

    #[test]
    fn test_deserialize_rejects_short_key() {
        let json = format!("\"{}\"", STANDARD.encode([0u8; 10]));
        assert!(serde_json::from_str::<ChunkKey>(&json).is_err());
    }
}
