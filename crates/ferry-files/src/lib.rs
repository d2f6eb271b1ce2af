//! # FERRY Files
//!
//! File side of the FERRY transfer protocol.
//!
//! This crate provides:
//! - Sequential fixed-size chunk reading from any async source
//! - XXH64 chunk digests for per-chunk integrity checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod hasher;

pub use chunker::{Chunk, ChunkError, ChunkReader};
pub use hasher::{DIGEST_SEED, DIGEST_SIZE, digest, verify};

/// Default chunk size (64 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Largest chunk size a transfer may be configured with (1 GiB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// Number of chunks a source of `size` bytes splits into.
///
/// A zero-length source has no chunks at all.
#[must_use]
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size as u64)
}
