use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// An object already exists under this identifier (HTTP 409 equivalent).
    /// Stores never overwrite.
    #[error("chunk {0} already exists")]
    AlreadyExists(String),

    #[error("chunk {0} not found")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote job ran and reported failure, or the job API answered with
    /// a status outside the protocol.
    #[error("job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    /// Downloaded bytes do not match the checksum the server reported.
    #[error("integrity check failed for chunk {0}")]
    Integrity(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<opendal::Error> for StorageError {
    fn from(e: opendal::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}
