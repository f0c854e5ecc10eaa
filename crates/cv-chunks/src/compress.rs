//! Whole-stream zstd compression
//!
//! Compression runs once over the canonical stream, before splitting, so
//! chunk boundaries fall on compressed offsets.

use crate::error::{ChunkError, ChunkResult};

/// Default zstd level
pub const DEFAULT_LEVEL: i32 = 3;

pub fn compress(data: &[u8], level: i32) -> ChunkResult<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| ChunkError::Compression(format!("zstd compress: {e}")))
}

pub fn decompress(data: &[u8]) -> ChunkResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| ChunkError::Compression(format!("zstd decompress: {e}")))
}
