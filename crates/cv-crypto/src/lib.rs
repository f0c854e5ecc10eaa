//! cv-crypto: client-side chunk encryption for chunkvault
//!
//! Architecture: Split-then-Encrypt with AES-256-CBC
//!
//! Pipeline: source → (tar) → SHA-384 checksum → (zstd) → fixed-size split → encrypt → upload
//!
//! Key material:
//! ```text
//! Chunk Key (per-chunk, 256-bit random, stored only in the reference file)
//!   └── XOR Master Key (optional, PBKDF2-HMAC-SHA256 from passphrase,
//!       10_000..=13_000 rounds, 8-byte salt shared by the whole file)
//!         = effective AES-256-CBC key, IV random per chunk and prepended
//! ```
//!
//! Neither keys nor plaintext metadata ever leave the client: the backend sees
//! ciphertext and an opaque identifier only.

pub mod cipher;
pub mod codec;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod reference;

pub use cipher::{decrypt_chunk, encrypt_chunk, Unpadded};
pub use codec::{
    decode, decode_to_path, encode, encode_bytes, EncodeOptions, Encoded, EncryptedChunk,
};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_master_key, generate_salt, KdfParams, MasterKey};
pub use keys::{combine_keys, effective_key, generate_chunk_key, ChunkKey};
pub use reference::{Derivation, Metadata, ReferenceFile};

/// Size of every key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-CBC initialization vector
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Size of the file-wide PBKDF2 salt
pub const SALT_SIZE: usize = 8;
