//! Content hashing of texture regions.
//!
//! Three mutually exclusive modes with different speed/collision tradeoffs:
//! a CRC32 checksum for quick mode, and 32/64-bit xxHash tiers for packs
//! that need collision resistance (the 64-bit result is truncated to 32
//! bits since all keys carry a 32-bit content hash).

use std::str::FromStr;

use crate::error::PolicyError;

/// Fixed seed for the xxHash tiers so hashes are stable across sessions
/// and match filenames dumped by other frontends using the same scheme.
const XXHASH_SEED: u32 = 0xBACD7814;

/// Hash mode selected by the pack's options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementHash {
    /// Fast checksum. Cheapest, least collision-resistant; reduce-factor and
    /// address-ignoring options are refused under this mode.
    #[default]
    Quick,
    Xxh32,
    Xxh64,
}

impl FromStr for ReplacementHash {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "xxh32" => Ok(Self::Xxh32),
            "xxh64" => Ok(Self::Xxh64),
            other => Err(PolicyError::UnsupportedHashMode(other.to_string())),
        }
    }
}

/// Hash one contiguous byte run.
pub fn hash_bytes(mode: ReplacementHash, data: &[u8]) -> u32 {
    match mode {
        ReplacementHash::Quick => crc32fast::hash(data),
        ReplacementHash::Xxh32 => xxhash_rust::xxh32::xxh32(data, XXHASH_SEED),
        ReplacementHash::Xxh64 => xxhash_rust::xxh64::xxh64(data, XXHASH_SEED as u64) as u32,
    }
}

/// Hash a strided region row by row.
///
/// Each row contributes `bytes_per_line` bytes starting `stride` bytes after
/// the previous row. Row hashes are folded with `result * 11 ^ rowHash`,
/// which is deliberately non-commutative: transposed or row-shuffled content
/// must not collide.
pub fn hash_rows(
    mode: ReplacementHash,
    data: &[u8],
    stride: usize,
    bytes_per_line: usize,
    rows: usize,
) -> u32 {
    let mut result: u32 = 0;
    for y in 0..rows {
        let start = y * stride;
        let row_hash = hash_bytes(mode, &data[start..start + bytes_per_line]);
        result = result.wrapping_mul(11) ^ row_hash;
    }
    result
}
