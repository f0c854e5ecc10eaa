use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Chunk(#[from] cv_chunks::ChunkError),

    #[error("key length mismatch: key {index} is {actual} bytes, expected {expected}")]
    KeyLengthMismatch {
        index: usize,
        actual: usize,
        expected: usize,
    },

    /// Decode produced bytes that cannot be the recorded plaintext. Raised
    /// for any of:
    /// - a chunk whose PKCS#5 padding is invalid after decryption
    /// - a compressed stream that fails to decompress
    /// - a reassembled stream whose SHA-384 differs from the reference
    ///
    /// A wrong master key always lands here, as do corrupted or tampered
    /// chunks that still have a valid shape.
    #[error("checksum mismatch: expected {expected} ({detail})")]
    ChecksumMismatch { expected: String, detail: String },

    /// A chunk is not CBC ciphertext at all: shorter than IV plus one block,
    /// or not block aligned. Decided before any key is applied, so it
    /// points at truncation or a foreign object, never at the key.
    #[error("chunk {index} cannot be decrypted: {reason}")]
    DecryptFailure { index: usize, reason: String },

    #[error("reference file was sealed with a master key, but none was supplied")]
    MasterKeyRequired,

    #[error("invalid reference file: {0}")]
    InvalidReference(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    pub fn is_chunk_size_too_small(&self) -> bool {
        matches!(
            self,
            CryptoError::Chunk(cv_chunks::ChunkError::ChunkSizeTooSmall { .. })
        )
    }
}
