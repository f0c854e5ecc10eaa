//! Per-chunk AES-256-CBC encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [16 bytes: random IV][N * 16 bytes: CBC ciphertext, PKCS#5/7 padded]
//! ```
//!
//! CBC carries no authentication tag. Integrity of the reassembled file is
//! established by the SHA-384 checksum in the reference file, so a bad
//! padding block is reported separately from a structurally broken chunk.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, Iv, KeyIvInit};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::{BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Outcome of a decryption whose ciphertext was well-formed.
#[derive(Debug)]
pub enum Unpadded {
    Plaintext(Vec<u8>),
    /// The final block did not carry valid PKCS#7 padding: wrong key or
    /// modified ciphertext.
    BadPadding,
}

/// Encrypt one chunk with a fresh random IV.
///
/// Returns: `[16-byte IV][ciphertext]`
pub fn encrypt_chunk(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    result
}

/// Decrypt one chunk.
///
/// Fails with `DecryptFailure` when the input cannot be CBC ciphertext at all
/// (shorter than IV + one block, or not block aligned). A padding failure
/// is returned as [`Unpadded::BadPadding`] so the caller decides how to
/// classify it.
pub fn decrypt_chunk(
    key: &[u8; KEY_SIZE],
    chunk_index: usize,
    encrypted: &[u8],
) -> CryptoResult<Unpadded> {
    if encrypted.len() < IV_SIZE + BLOCK_SIZE {
        return Err(CryptoError::DecryptFailure {
            index: chunk_index,
            reason: format!(
                "{} bytes is shorter than IV plus one block ({})",
                encrypted.len(),
                IV_SIZE + BLOCK_SIZE
            ),
        });
    }
    if (encrypted.len() - IV_SIZE) % BLOCK_SIZE != 0 {
        return Err(CryptoError::DecryptFailure {
            index: chunk_index,
            reason: format!(
                "ciphertext length {} is not a multiple of the {BLOCK_SIZE}-byte block",
                encrypted.len() - IV_SIZE
            ),
        });
    }

    let (iv, ciphertext) = encrypted.split_at(IV_SIZE);
    let iv = Iv::<Aes256CbcDec>::from_slice(iv);

    match Aes256CbcDec::new(key.into(), iv).decrypt_padded_vec_mut::<Pkcs7>(ciphertext) {
        Ok(plain) => Ok(Unpadded::Plaintext(plain)),
        Err(_) => Ok(Unpadded::BadPadding),
    }
}
