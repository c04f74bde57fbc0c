//! Cache key types and canonical filename generation.

use std::fmt;

/// Maximum number of mip levels a replacement set may carry.
pub const MAX_REPLACEMENT_MIP_LEVELS: usize = 12;

/// Composite key identifying one observed texture upload.
///
/// `cachekey` packs the upload's address context into 64 bits: the source
/// address in the upper half and the palette (CLUT) hash in the lower half.
/// `hash` is the 32-bit content hash of the pixel data. Two keys with the
/// same `cachekey` but different `hash` are different observed contents at
/// the same logical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplacementCacheKey {
    pub cachekey: u64,
    pub hash: u32,
}

impl ReplacementCacheKey {
    pub fn new(cachekey: u64, hash: u32) -> Self {
        Self { cachekey, hash }
    }
}

impl fmt::Display for ReplacementCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:08x}", self.cachekey, self.hash)
    }
}

/// Canonical filename stem for a (cachekey, hash) pair at a given mip level.
///
/// Level 0 omits the suffix so generated lookup names match the names the
/// save path dumps textures under.
pub fn hash_name(cachekey: u64, hash: u32, level: usize) -> String {
    if level > 0 {
        format!("{:016x}{:08x}_{}", cachekey, hash, level)
    } else {
        format!("{:016x}{:08x}", cachekey, hash)
    }
}

/// Parse a `[hashes]`-style key: 16 hex digits of cache key, optionally
/// followed by 8 hex digits of content hash and an `_level` suffix.
///
/// Shorter keys are accepted and parsed as a cache key alone, which is how
/// wildcard entries (zeroed hash) are written in packs.
pub fn parse_hash_key(s: &str) -> Option<(ReplacementCacheKey, usize)> {
    let (key_part, level) = match s.split_once('_') {
        Some((k, l)) => (k, l.parse::<usize>().ok()?),
        None => (s, 0),
    };
    if key_part.is_empty() || !key_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let key = if key_part.len() > 16 {
        let (ck, h) = key_part.split_at(16);
        if h.len() > 8 {
            return None;
        }
        ReplacementCacheKey::new(
            u64::from_str_radix(ck, 16).ok()?,
            u32::from_str_radix(h, 16).ok()?,
        )
    } else {
        ReplacementCacheKey::new(u64::from_str_radix(key_part, 16).ok()?, 0)
    };
    Some((key, level))
}
