use thiserror::Error;

pub type ChunkResult<T> = Result<T, ChunkError>;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk size {requested} is below the minimum of {minimum} bytes")]
    ChunkSizeTooSmall { requested: usize, minimum: usize },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
