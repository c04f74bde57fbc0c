//! Wildcard key relaxation for author-specified overrides.
//!
//! Pack authors can register entries at several granularities, from an exact
//! (cachekey, hash) pair down to a bare content hash. Lookup relaxes the key
//! step by step in decreasing confidence order and stops at the first hit.

use std::collections::HashMap;

use crate::key::ReplacementCacheKey;

/// Resolve `(cachekey, hash)` against `map`, relaxing the key progressively:
///
/// 1. Exact (cachekey, hash).
/// 2. Low 32 bits of the cache key (CLUT hash) with the content hash zeroed.
/// 3. Full cache key with the content hash zeroed. Skipped under
///    `ignore_address` since the address half is meaningless then.
/// 4. Low 32 bits of the cache key with the exact content hash.
/// 5. Upper 32 bits of the cache key (address, no CLUT) with the exact
///    content hash. Also skipped under `ignore_address`.
/// 6. Content hash alone, any address context. The broadest rule, and the
///    riskiest.
///
/// Callers wanting a fully global fallback check `(0, 0)` themselves after a
/// miss here; that is only sensible for filtering overrides.
pub fn lookup_wildcard<V>(
    map: &HashMap<ReplacementCacheKey, V>,
    cachekey: u64,
    hash: u32,
    ignore_address: bool,
) -> Option<&V> {
    if let Some(v) = map.get(&ReplacementCacheKey::new(cachekey, hash)) {
        return Some(v);
    }
    if let Some(v) = map.get(&ReplacementCacheKey::new(cachekey & 0xFFFF_FFFF, 0)) {
        return Some(v);
    }
    if !ignore_address {
        if let Some(v) = map.get(&ReplacementCacheKey::new(cachekey, 0)) {
            return Some(v);
        }
    }
    if let Some(v) = map.get(&ReplacementCacheKey::new(cachekey & 0xFFFF_FFFF, hash)) {
        return Some(v);
    }
    if !ignore_address {
        if let Some(v) = map.get(&ReplacementCacheKey::new(cachekey & !0xFFFF_FFFF, hash)) {
            return Some(v);
        }
    }
    map.get(&ReplacementCacheKey::new(0, hash))
}
