//! Fixed-size positional splitting
//!
//! Boundaries depend only on offsets: chunk `i` covers
//! `[i * chunk_size, min((i + 1) * chunk_size, len))`. Only the last chunk may
//! be shorter. An empty stream still yields a single (empty) chunk so that
//! every encoded file has at least one identifier.

use crate::error::{ChunkError, ChunkResult};

/// Smallest accepted chunk size. A configuration guard, not a tuning knob.
pub const MIN_CHUNK_SIZE: usize = 32;

/// Number of chunks `split` produces for `len` bytes.
pub fn chunk_count(len: usize, chunk_size: usize) -> ChunkResult<usize> {
    check_size(chunk_size)?;
    Ok(len.div_ceil(chunk_size).max(1))
}

/// Split `data` into `chunk_count(data.len(), chunk_size)` slices.
pub fn split(data: &[u8], chunk_size: usize) -> ChunkResult<Vec<&[u8]>> {
    check_size(chunk_size)?;
    if data.is_empty() {
        return Ok(vec![data]);
    }
    Ok(data.chunks(chunk_size).collect())
}

fn check_size(chunk_size: usize) -> ChunkResult<()> {
    if chunk_size < MIN_CHUNK_SIZE {
        return Err(ChunkError::ChunkSizeTooSmall {
            requested: chunk_size,
            minimum: MIN_CHUNK_SIZE,
        });
    }
    Ok(())
}
