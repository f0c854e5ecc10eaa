//! Chunk codec: source → encrypted chunks + reference material, and back
//!
//! Encode:
//!   1. read the source (directories are archived to a tar stream first)
//!   2. SHA-384 the canonical stream
//!   3. optionally zstd the stream
//!   4. split into `max(1, ceil(len / chunk_size))` positional chunks
//!   5. encrypt each chunk under its own random key, XOR the master key when
//!      a passphrase is given
//!
//! Decode reverses the steps and refuses to return anything that does not
//! hash to the recorded checksum.

use rayon::prelude::*;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::cipher::{decrypt_chunk, encrypt_chunk, Unpadded};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_master_key, generate_salt, KdfParams, MasterKey};
use crate::keys::{effective_key, generate_chunk_key, ChunkKey};
use crate::reference::{Derivation, Metadata, ReferenceFile};

/// Encoding parameters
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Bytes of (post-compression) stream per chunk, at least 32
    pub chunk_size: usize,
    pub compress: bool,
    pub zstd_level: i32,
    pub kdf: KdfParams,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
            compress: true,
            zstd_level: cv_chunks::compress::DEFAULT_LEVEL,
            kdf: KdfParams::default(),
        }
    }
}

/// One encrypted chunk and its position in the original sequence.
#[derive(Debug, Clone)]
pub struct EncryptedChunk {
    pub index: usize,
    pub ciphertext: Vec<u8>,
}

/// Output of [`encode`]. Chunks go to the backend; everything else ends up
/// in the reference file once the backend has assigned identifiers.
#[derive(Debug)]
pub struct Encoded {
    pub chunks: Vec<EncryptedChunk>,
    pub keys: Vec<ChunkKey>,
    pub metadata: Metadata,
    pub derivation: Derivation,
    pub chunk_size: usize,
    pub compressed: bool,
}

impl Encoded {
    /// Move the ciphertexts out, in index order.
    pub fn take_ciphertexts(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.chunks)
            .into_iter()
            .map(|c| c.ciphertext)
            .collect()
    }

    /// Seal the reference file with the identifiers returned by the backend.
    pub fn into_reference(self, ids: Vec<String>) -> CryptoResult<ReferenceFile> {
        if ids.len() != self.keys.len() {
            return Err(CryptoError::InvalidReference(format!(
                "{} identifiers for {} chunks",
                ids.len(),
                self.keys.len()
            )));
        }
        Ok(ReferenceFile {
            metadata: self.metadata,
            derivation: self.derivation,
            keys: self.keys,
            ids,
            chunk_size: self.chunk_size,
            compressed: self.compressed,
        })
    }
}

/// Encode a file or directory from disk.
pub fn encode(
    master: Option<&SecretString>,
    source: &Path,
    opts: &EncodeOptions,
) -> CryptoResult<Encoded> {
    cv_chunks::chunk_count(0, opts.chunk_size)?;

    let meta = std::fs::metadata(source)?;
    let is_dir = meta.is_dir();
    let stream = if is_dir {
        cv_chunks::archive_dir(source)?
    } else {
        std::fs::read(source)?
    };
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());

    encode_stream(master, name, stream, is_dir, modified, opts)
}

/// Encode an in-memory byte stream as a regular file named `name`.
pub fn encode_bytes(
    master: Option<&SecretString>,
    name: &str,
    data: &[u8],
    opts: &EncodeOptions,
) -> CryptoResult<Encoded> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    encode_stream(master, name.to_string(), data.to_vec(), false, now, opts)
}

fn encode_stream(
    master: Option<&SecretString>,
    name: String,
    stream: Vec<u8>,
    is_dir: bool,
    modified: u64,
    opts: &EncodeOptions,
) -> CryptoResult<Encoded> {
    cv_chunks::chunk_count(stream.len(), opts.chunk_size)?;

    let checksum = cv_chunks::checksum(&stream);
    let size = stream.len() as u64;
    let body = if opts.compress {
        cv_chunks::compress(&stream, opts.zstd_level)?
    } else {
        stream
    };

    let (derivation, master_key) = match master {
        Some(passphrase) => {
            let rounds = opts.kdf.pick_rounds()?;
            let salt = generate_salt();
            let key = derive_master_key(passphrase, &salt, rounds)?;
            (
                Derivation {
                    rounds,
                    salt: Some(salt),
                },
                Some(key),
            )
        }
        None => (Derivation::default(), None),
    };

    let pieces = cv_chunks::split(&body, opts.chunk_size)?;
    let sealed: Vec<(EncryptedChunk, ChunkKey)> = pieces
        .par_iter()
        .enumerate()
        .map(|(index, piece)| {
            let chunk_key = generate_chunk_key();
            let key = effective_key(&chunk_key, master_key.as_ref())?;
            let ciphertext = encrypt_chunk(&key, piece);
            Ok((EncryptedChunk { index, ciphertext }, chunk_key))
        })
        .collect::<CryptoResult<_>>()?;
    let (chunks, keys): (Vec<_>, Vec<_>) = sealed.into_iter().unzip();

    debug!(
        name = %name,
        size,
        stream_bytes = body.len(),
        chunks = chunks.len(),
        compressed = opts.compress,
        master_key = derivation.uses_master_key(),
        "encoded"
    );

    Ok(Encoded {
        chunks,
        keys,
        metadata: Metadata {
            name,
            size,
            modified,
            is_dir,
            checksum,
        },
        derivation,
        chunk_size: opts.chunk_size,
        compressed: opts.compress,
    })
}

/// Decrypt, reassemble, and verify the canonical plaintext stream.
///
/// `chunks[i]` must be the ciphertext for `reference.keys[i]`.
pub fn decode(
    chunks: &[Vec<u8>],
    reference: &ReferenceFile,
    master: Option<&SecretString>,
) -> CryptoResult<Vec<u8>> {
    check_reference(reference, chunks.len())?;
    let master_key = resolve_master_key(reference, master)?;
    let expected = reference.metadata.checksum;

    let opened: Vec<Unpadded> = chunks
        .par_iter()
        .zip(reference.keys.par_iter())
        .enumerate()
        .map(|(index, (ciphertext, chunk_key))| {
            let key = effective_key(chunk_key, master_key.as_ref())?;
            decrypt_chunk(&key, index, ciphertext)
        })
        .collect::<CryptoResult<_>>()?;

    let mut body = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    for (index, piece) in opened.into_iter().enumerate() {
        match piece {
            Unpadded::Plaintext(p) => body.extend_from_slice(&p),
            Unpadded::BadPadding => {
                return Err(CryptoError::ChecksumMismatch {
                    expected: expected.to_hex(),
                    detail: format!("chunk {index} has invalid padding"),
                })
            }
        }
    }

    let stream = if reference.compressed {
        cv_chunks::decompress(&body).map_err(|e| CryptoError::ChecksumMismatch {
            expected: expected.to_hex(),
            detail: format!("stream does not decompress: {e}"),
        })?
    } else {
        body
    };

    let actual = cv_chunks::checksum(&stream);
    if actual != expected {
        return Err(CryptoError::ChecksumMismatch {
            expected: expected.to_hex(),
            detail: format!("got {}", actual.to_hex()),
        });
    }

    debug!(name = %reference.metadata.name, bytes = stream.len(), "decoded and verified");
    Ok(stream)
}

/// Decode and materialize on disk: a directory stream is unpacked into
/// `dest`, a regular file is written atomically to `dest`.
pub fn decode_to_path(
    chunks: &[Vec<u8>],
    reference: &ReferenceFile,
    master: Option<&SecretString>,
    dest: &Path,
) -> CryptoResult<u64> {
    let stream = decode(chunks, reference, master)?;
    let bytes = stream.len() as u64;

    if reference.metadata.is_dir {
        cv_chunks::unpack_archive(&stream, dest)?;
        return Ok(bytes);
    }

    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp: PathBuf = dest.with_extension("cv_tmp");
    std::fs::write(&tmp, &stream)?;
    std::fs::rename(&tmp, dest)?;
    Ok(bytes)
}

fn check_reference(reference: &ReferenceFile, chunk_count: usize) -> CryptoResult<()> {
    if reference.keys.len() != chunk_count {
        return Err(CryptoError::InvalidReference(format!(
            "{} keys for {} chunks",
            reference.keys.len(),
            chunk_count
        )));
    }
    if !reference.ids.is_empty() && reference.ids.len() != reference.keys.len() {
        return Err(CryptoError::InvalidReference(format!(
            "{} identifiers for {} keys",
            reference.ids.len(),
            reference.keys.len()
        )));
    }
    if reference.derivation.uses_master_key() && reference.derivation.rounds == 0 {
        return Err(CryptoError::InvalidReference(
            "salt present but round count is zero".into(),
        ));
    }
    cv_chunks::chunk_count(0, reference.chunk_size)?;
    Ok(())
}

fn resolve_master_key(
    reference: &ReferenceFile,
    master: Option<&SecretString>,
) -> CryptoResult<Option<MasterKey>> {
    match (&reference.derivation.salt, master) {
        (Some(salt), Some(passphrase)) => Ok(Some(derive_master_key(
            passphrase,
            salt,
            reference.derivation.rounds,
        )?)),
        (Some(_), None) => Err(CryptoError::MasterKeyRequired),
        (None, Some(_)) => {
            warn!(
                name = %reference.metadata.name,
                "master key supplied but reference was sealed without one; ignoring it"
            );
            Ok(None)
        }
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fast_opts(chunk_size: usize, compress: bool) -> EncodeOptions {
        EncodeOptions {
            chunk_size,
            compress,
            zstd_level: 1,
            kdf: KdfParams {
                min_rounds: 8,
                max_rounds: 16,
            },
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
            .collect()
    }

    fn roundtrip(
        data: &[u8],
        opts: &EncodeOptions,
        enc_key: Option<&SecretString>,
        dec_key: Option<&SecretString>,
    ) -> CryptoResult<Vec<u8>> {
        let mut encoded = encode_bytes(enc_key, "data.bin", data, opts)?;
        let chunks = encoded.take_ciphertexts();
        let ids = (0..chunks.len()).map(|i| format!("id-{i}")).collect();
        let reference = encoded.into_reference(ids)?;
        decode(&chunks, &reference, dec_key)
    }

    #[test]
    fn test_chunk_size_below_minimum() {
        let err = encode_bytes(None, "x", b"abc", &fast_opts(16, false)).unwrap_err();
        assert!(err.is_chunk_size_too_small());
    }

    #[test]
    fn test_ten_kib_uncompressed_gives_three_chunks() {
        let data = pattern(10 * 1024);
        let encoded = encode_bytes(None, "ten.bin", &data, &fast_opts(4096, false)).unwrap();
        assert_eq!(encoded.chunks.len(), 3);
        assert_eq!(encoded.keys.len(), 3);
        assert_eq!(encoded.metadata.size, 10 * 1024);
        assert_eq!(encoded.metadata.checksum, cv_chunks::checksum(&data));
        assert!(!encoded.derivation.uses_master_key());
        for (i, c) in encoded.chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_empty_input_roundtrip() {
        let out = roundtrip(b"", &fast_opts(32, false), None, None).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_master_key_roundtrip_and_wrong_key() {
        let data = pattern(5000);
        let opts = fast_opts(1024, true);
        let good = SecretString::from("secret123");
        let bad = SecretString::from("wrong");

        let mut encoded = encode_bytes(Some(&good), "m.bin", &data, &opts).unwrap();
        assert!(encoded.derivation.uses_master_key());
        let rounds = encoded.derivation.rounds;
        assert!((8..=16).contains(&rounds));

        let chunks = encoded.take_ciphertexts();
        let ids = (0..chunks.len()).map(|i| i.to_string()).collect();
        let reference = encoded.into_reference(ids).unwrap();

        assert_eq!(decode(&chunks, &reference, Some(&good)).unwrap(), data);
        assert!(matches!(
            decode(&chunks, &reference, Some(&bad)),
            Err(CryptoError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            decode(&chunks, &reference, None),
            Err(CryptoError::MasterKeyRequired)
        ));
    }

    #[test]
    fn test_master_key_is_ignored_when_reference_has_none() {
        let data = pattern(300);
        let key = SecretString::from("unused");
        let out = roundtrip(&data, &fast_opts(64, false), None, Some(&key)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_reordered_chunks_fail() {
        let data = pattern(4096);
        let mut encoded = encode_bytes(None, "o.bin", &data, &fast_opts(1024, false)).unwrap();
        let mut chunks = encoded.take_ciphertexts();
        let reference = encoded
            .into_reference((0..chunks.len()).map(|i| i.to_string()).collect())
            .unwrap();
        chunks.swap(0, 1);
        assert!(decode(&chunks, &reference, None).is_err());
    }

    #[test]
    fn test_truncated_chunk_is_decrypt_failure() {
        let data = pattern(2048);
        let mut encoded = encode_bytes(None, "t.bin", &data, &fast_opts(1024, false)).unwrap();
        let mut chunks = encoded.take_ciphertexts();
        let reference = encoded
            .into_reference((0..chunks.len()).map(|i| i.to_string()).collect())
            .unwrap();
        chunks[1].pop();
        assert!(matches!(
            decode(&chunks, &reference, None),
            Err(CryptoError::DecryptFailure { index: 1, .. })
        ));
    }

    #[test]
    fn test_chunk_count_mismatch_is_invalid_reference() {
        let mut encoded = encode_bytes(None, "c.bin", &pattern(3000), &fast_opts(1024, false)).unwrap();
        let mut chunks = encoded.take_ciphertexts();
        let reference = encoded
            .into_reference((0..chunks.len()).map(|i| i.to_string()).collect())
            .unwrap();
        chunks.pop();
        assert!(matches!(
            decode(&chunks, &reference, None),
            Err(CryptoError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_into_reference_rejects_wrong_id_count() {
        let encoded = encode_bytes(None, "c.bin", &pattern(3000), &fast_opts(1024, false)).unwrap();
        assert!(encoded.into_reference(vec!["only-one".into()]).is_err());
    }

    #[test]
    fn test_encode_decode_file_on_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("notes.txt");
        let data = pattern(9000);
        std::fs::write(&src, &data).unwrap();

        let mut encoded = encode(None, &src, &fast_opts(4096, true)).unwrap();
        assert_eq!(encoded.metadata.name, "notes.txt");
        assert!(!encoded.metadata.is_dir);
        let chunks = encoded.take_ciphertexts();
        let reference = encoded
            .into_reference((0..chunks.len()).map(|i| i.to_string()).collect())
            .unwrap();

        let dest = tmp.path().join("out/notes.txt");
        let written = decode_to_path(&chunks, &reference, None, &dest).unwrap();
        assert_eq!(written, 9000);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn test_encode_decode_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("project");
        std::fs::create_dir_all(src.join("src")).unwrap();
        std::fs::write(src.join("Cargo.toml"), b"[package]").unwrap();
        std::fs::write(src.join("src/main.rs"), b"fn main() {}").unwrap();

        let key = SecretString::from("dir-pass");
        let mut encoded = encode(Some(&key), &src, &fast_opts(256, true)).unwrap();
        assert!(encoded.metadata.is_dir);
        let chunks = encoded.take_ciphertexts();
        let reference = encoded
            .into_reference((0..chunks.len()).map(|i| i.to_string()).collect())
            .unwrap();

        let dest = tmp.path().join("restored");
        decode_to_path(&chunks, &reference, Some(&key), &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("Cargo.toml")).unwrap(), b"[package]");
        assert_eq!(
            std::fs::read(dest.join("src/main.rs")).unwrap(),
            b"fn main() {}"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn decode_inverts_encode(
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
            chunk_size in 32usize..=1500,
            compress in any::<bool>(),
        ) {
            let out = roundtrip(&data, &fast_opts(chunk_size, compress), None, None).unwrap();
            prop_assert_eq!(out, data);
        }

        #[test]
        fn chunk_count_matches_post_compression_length(
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
            chunk_size in 32usize..=1500,
            compress in any::<bool>(),
        ) {
            let opts = fast_opts(chunk_size, compress);
            let body_len = if compress {
                cv_chunks::compress(&data, opts.zstd_level).unwrap().len()
            } else {
                data.len()
            };
            let encoded = encode_bytes(None, "p.bin", &data, &opts).unwrap();
            prop_assert_eq!(encoded.chunks.len(), std::cmp::max(1, body_len.div_ceil(chunk_size)));
        }

        #[test]
        fn single_byte_mutation_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..=2048),
            chunk_size in 32usize..=512,
            pick in any::<proptest::sample::Index>(),
            offset in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut encoded = encode_bytes(None, "m.bin", &data, &fast_opts(chunk_size, false)).unwrap();
            let mut chunks = encoded.take_ciphertexts();
            let reference = encoded
                .into_reference((0..chunks.len()).map(|i| i.to_string()).collect())
                .unwrap();

            let c = pick.index(chunks.len());
            let o = offset.index(chunks[c].len());
            chunks[c][o] ^= flip;

            let result = decode(&chunks, &reference, None);
            prop_assert!(
                matches!(
                    result,
                    Err(CryptoError::ChecksumMismatch { .. }) | Err(CryptoError::DecryptFailure { .. })
                ),
                "mutation must never decode silently"
            );
        }
    }
}
