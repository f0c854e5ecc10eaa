//! cv-chunks: turning a file or directory into the canonical byte stream that
//! gets encrypted, and slicing that stream into fixed-size chunks
//!
//! # Overview
//! - `archive`: directory ⇄ tar stream (relative paths preserved)
//! - `compress`: whole-stream zstd
//! - `checksum`: SHA-384 stream checksum and BLAKE3 chunk identifiers
//! - `split`: positional fixed-size splitting

pub mod archive;
pub mod checksum;
pub mod compress;
pub mod error;
pub mod split;

pub use archive::{archive_dir, unpack_archive};
pub use checksum::{checksum, chunk_id, Checksum, CHECKSUM_SIZE};
pub use compress::{compress, decompress};
pub use error::{ChunkError, ChunkResult};
pub use split::{chunk_count, split, MIN_CHUNK_SIZE};
