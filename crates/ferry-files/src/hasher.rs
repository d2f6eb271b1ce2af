//! XXH64 chunk digests.

use xxhash_rust::xxh64::xxh64;

/// Seed for every chunk digest. Fixed so digests agree across processes.
pub const DIGEST_SEED: u64 = 0;

/// Width of a digest on the wire
pub const DIGEST_SIZE: usize = 8;

/// Digest a chunk's exact bytes
#[must_use]
pub fn digest(data: &[u8]) -> u64 {
    xxh64(data, DIGEST_SEED)
}

/// Verify a chunk against its expected digest
#[must_use]
pub fn verify(data: &[u8], expected: u64) -> bool {
    digest(data) == expected
}
