//! Key derivation: PBKDF2-HMAC-SHA256 passphrase → master key

use pbkdf2::pbkdf2_hmac;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit key derived from the user's master passphrase.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Bounds of the per-encryption randomized PBKDF2 round count
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    /// Inclusive lower bound (default: 10_000)
    pub min_rounds: u32,
    /// Inclusive upper bound (default: 13_000)
    pub max_rounds: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            min_rounds: 10_000,
            max_rounds: 13_000,
        }
    }
}

impl KdfParams {
    /// Pick a round count uniformly from `min_rounds..=max_rounds`.
    pub fn pick_rounds(&self) -> CryptoResult<u32> {
        if self.min_rounds == 0 || self.min_rounds > self.max_rounds {
            return Err(CryptoError::Kdf(format!(
                "invalid round bounds {}..={}",
                self.min_rounds, self.max_rounds
            )));
        }
        Ok(rand::thread_rng().gen_range(self.min_rounds..=self.max_rounds))
    }
}

/// Generate the random file-wide salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit master key from a passphrase.
///
/// Deterministic for identical inputs; the salt and round count are stored in
/// the reference file so decode can repeat the derivation.
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    rounds: u32,
) -> CryptoResult<MasterKey> {
    if rounds == 0 {
        return Err(CryptoError::Kdf("round count must be positive".into()));
    }
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.expose_secret().as_bytes(), salt, rounds, &mut key);
    Ok(MasterKey::from_bytes(key))
}
