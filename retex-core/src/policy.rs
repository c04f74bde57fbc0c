//! The immutable replacement policy.
//!
//! All pack-author configuration (hash mode, option flags, alias/filtering/
//! hash-range tables) is folded into one `ReplacerPolicy` value, rebuilt
//! atomically on every configuration reload and never mutated afterwards.
//! Parsing the pack's lookup file into key/value sections is the embedder's
//! job; this module only interprets the already-split entries.
//!
//! Malformed entries are logged and dropped so one typo does not take the
//! whole pack down. A missing or unknown hash mode is different: none of the
//! pack's hash entries can be trusted then, so policy construction fails and
//! the cache stays disabled.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::error::PolicyError;
use crate::hash::ReplacementHash;
use crate::key::{parse_hash_key, ReplacementCacheKey};
use crate::wildcard::lookup_wildcard;

/// Newest lookup-file layout this build understands.
const VERSION: i64 = 1;

/// Forced filtering override for a replaced texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFiltering {
    Auto,
    ForceNearest,
    ForceLinear,
}

/// Already-parsed sections of a texture pack's lookup file.
///
/// The on-disk syntax (ini or otherwise) is handled by the embedder; each
/// map here is one section's key/value pairs.
#[derive(Debug, Default, Clone)]
pub struct PackConfig {
    pub options: BTreeMap<String, String>,
    /// `hashname = filename`, one entry per mip level.
    pub hashes: BTreeMap<String, String>,
    /// `addr,w,h = newW,newH`
    pub hashranges: BTreeMap<String, String>,
    /// `hashname = nearest|linear|auto`
    pub filtering: BTreeMap<String, String>,
    /// `w,h = reduceFactor`
    pub reducehashranges: BTreeMap<String, String>,
}

/// Immutable policy value handed to the cache by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacerPolicy {
    pub hash_mode: ReplacementHash,
    /// Allow saving textures that come from video frames.
    pub allow_video: bool,
    /// Drop the address half of cache keys before resolution.
    pub ignore_address: bool,
    /// Enable reduced-sampling hashing (see [`Self::lookup_reduce_hash_range`]).
    pub reduce_hash: bool,
    /// Reduce factor used where no per-size entry exists.
    pub reduce_hash_global: f32,
    /// Skip saving mip levels above 0.
    pub ignore_mipmap: bool,
    /// Key -> '|'-joined per-level filenames; empty string means the entry is
    /// deliberately suppressed.
    aliases: HashMap<ReplacementCacheKey, String>,
    /// (addr, w, h) -> override dimensions, packed as in [`range_key`].
    hashranges: HashMap<u64, (u32, u32)>,
    filtering: HashMap<ReplacementCacheKey, TextureFiltering>,
    /// (w, h) -> reduce factor.
    reducehashranges: HashMap<u64, f32>,
}

impl Default for ReplacerPolicy {
    fn default() -> Self {
        Self {
            hash_mode: ReplacementHash::Quick,
            allow_video: false,
            ignore_address: false,
            reduce_hash: false,
            reduce_hash_global: 0.5,
            ignore_mipmap: false,
            aliases: HashMap::new(),
            hashranges: HashMap::new(),
            filtering: HashMap::new(),
            reducehashranges: HashMap::new(),
        }
    }
}

fn range_key(addr: u32, w: u32, h: u32) -> u64 {
    ((addr as u64) << 32) | ((w as u64) << 16) | h as u64
}

fn reduce_range_key(w: u32, h: u32) -> u64 {
    ((w as u64) << 16) | h as u64
}

fn parse_bool(options: &BTreeMap<String, String>, key: &str, default: bool) -> bool {
    match options.get(key).map(String::as_str) {
        Some("true") | Some("True") | Some("1") => true,
        Some("false") | Some("False") | Some("0") => false,
        Some(other) => {
            log::error!("Ignoring invalid boolean option {} = {}", key, other);
            default
        }
        None => default,
    }
}

impl ReplacerPolicy {
    /// Build a policy from parsed pack sections.
    ///
    /// Fails only when the hash mode is missing or unknown; every other bad
    /// entry is dropped with an error log.
    pub fn from_config(config: &PackConfig) -> Result<Self, PolicyError> {
        let mut policy = Self::default();

        let hash = config
            .options
            .get("hash")
            .ok_or(PolicyError::MissingHashMode)?;
        policy.hash_mode = ReplacementHash::from_str(hash)?;

        policy.allow_video = parse_bool(&config.options, "video", policy.allow_video);
        policy.ignore_address =
            parse_bool(&config.options, "ignoreAddress", policy.ignore_address);
        policy.reduce_hash = parse_bool(&config.options, "reduceHash", policy.reduce_hash);
        policy.ignore_mipmap =
            parse_bool(&config.options, "ignoreMipmap", policy.ignore_mipmap);

        // The quick checksum is too weak to be the sole identity for these
        // options; refuse the combination rather than risk bad matches.
        if policy.reduce_hash && policy.hash_mode == ReplacementHash::Quick {
            policy.reduce_hash = false;
            log::error!("reduceHash option requires a safer hash, use xxh32 or xxh64 instead");
        }
        if policy.ignore_address && policy.hash_mode == ReplacementHash::Quick {
            policy.ignore_address = false;
            log::error!("ignoreAddress option requires a safer hash, use xxh32 or xxh64 instead");
        }

        if let Some(version) = config.options.get("version") {
            match version.parse::<i64>() {
                Ok(v) if v > VERSION => {
                    log::error!("Unsupported texture pack version {}, trying anyway", v);
                }
                Ok(_) => {}
                Err(_) => log::error!("Ignoring invalid version option: {}", version),
            }
        }

        policy.load_hashes(&config.hashes);
        for (key, value) in &config.hashranges {
            policy.parse_hash_range(key, value);
        }
        for (key, value) in &config.filtering {
            policy.parse_filtering(key, value);
        }
        for (key, value) in &config.reducehashranges {
            policy.parse_reduce_hash_range(key, value);
        }

        Ok(policy)
    }

    /// Collect `[hashes]` entries into per-key alias strings.
    ///
    /// Levels must be sequential from 0; a gap drops the remaining levels
    /// for that key. The '|'-joined filename list doubles as the canonical
    /// identity used to share handles, and an empty result is the marker for
    /// a deliberately suppressed entry.
    fn load_hashes(&mut self, hashes: &BTreeMap<String, String>) {
        let mut filename_map: HashMap<ReplacementCacheKey, BTreeMap<usize, String>> =
            HashMap::new();
        for (key, filename) in hashes {
            match parse_hash_key(key) {
                Some((cache_key, level)) => {
                    filename_map
                        .entry(cache_key)
                        .or_default()
                        .insert(level, filename.clone());
                }
                None => log::error!("Unsupported syntax under [hashes]: {}", key),
            }
        }

        for (cache_key, levels) in filename_map {
            let mut filenames: Vec<&str> = Vec::new();
            for (level, filename) in &levels {
                if *level != filenames.len() {
                    log::warn!(
                        "Non-sequential mip index {}, breaking. filenames={}",
                        level,
                        filename
                    );
                    break;
                }
                filenames.push(filename);
            }
            let mut alias = filenames.join("|");
            if alias == "|" {
                // Marker for no replacement.
                alias = String::new();
            }
            self.aliases.insert(cache_key, alias);
        }
    }

    fn parse_hash_range(&mut self, key: &str, value: &str) {
        let key_parts: Vec<&str> = key.split(',').collect();
        let value_parts: Vec<&str> = value.split(',').collect();
        if key_parts.len() != 3 || value_parts.len() != 2 {
            log::error!(
                "Ignoring invalid hashrange {} = {}, expecting addr,w,h = w,h",
                key,
                value
            );
            return;
        }

        let addr = parse_u32(key_parts[0]);
        let from_w = parse_u32(key_parts[1]);
        let from_h = parse_u32(key_parts[2]);
        let (Some(addr), Some(from_w), Some(from_h)) = (addr, from_w, from_h) else {
            log::error!(
                "Ignoring invalid hashrange {} = {}, key format is 0x12345678,512,512",
                key,
                value
            );
            return;
        };

        let (Some(to_w), Some(to_h)) = (parse_u32(value_parts[0]), parse_u32(value_parts[1]))
        else {
            log::error!(
                "Ignoring invalid hashrange {} = {}, value format is 512,512",
                key,
                value
            );
            return;
        };

        if to_w > from_w || to_h > from_h {
            log::error!(
                "Ignoring invalid hashrange {} = {}, range bigger than source",
                key,
                value
            );
            return;
        }

        self.hashranges
            .insert(range_key(addr, from_w, from_h), (to_w, to_h));
    }

    fn parse_filtering(&mut self, key: &str, value: &str) {
        let Some((cache_key, _)) = parse_hash_key(key) else {
            log::error!("Unsupported syntax under [filtering]: {}", key);
            return;
        };
        let mode = match value.to_ascii_lowercase().as_str() {
            "nearest" => TextureFiltering::ForceNearest,
            "linear" => TextureFiltering::ForceLinear,
            "auto" => TextureFiltering::Auto,
            _ => {
                log::error!("Unsupported syntax under [filtering]: {}", value);
                return;
            }
        };
        self.filtering.insert(cache_key, mode);
    }

    fn parse_reduce_hash_range(&mut self, key: &str, value: &str) {
        let key_parts: Vec<&str> = key.split(',').collect();
        if key_parts.len() != 2 {
            log::error!(
                "Ignoring invalid reducehashrange {} = {}, expecting w,h = reduceFactor",
                key,
                value
            );
            return;
        }
        let (Some(for_w), Some(for_h)) = (parse_u32(key_parts[0]), parse_u32(key_parts[1]))
        else {
            log::error!(
                "Ignoring invalid reducehashrange {} = {}, key format is 512,512",
                key,
                value
            );
            return;
        };
        let Ok(factor) = value.trim().parse::<f32>() else {
            log::error!(
                "Ignoring invalid reducehashrange {} = {}, value format is 0.5",
                key,
                value
            );
            return;
        };
        if factor == 0.0 {
            log::error!(
                "Ignoring invalid reducehashrange {} = {}, reduceFactor can't be 0",
                key,
                value
            );
            return;
        }
        self.reducehashranges
            .insert(reduce_range_key(for_w, for_h), factor);
    }

    /// Override dimensions registered for an (addr, w, h) region, if any.
    pub fn lookup_hash_range(&self, addr: u32, w: u32, h: u32) -> Option<(u32, u32)> {
        self.hashranges.get(&range_key(addr, w, h)).copied()
    }

    /// Reduce factor for a (w, h) region; falls back to the global value.
    pub fn lookup_reduce_hash_range(&self, w: u32, h: u32) -> f32 {
        self.reducehashranges
            .get(&reduce_range_key(w, h))
            .copied()
            .unwrap_or(self.reduce_hash_global)
    }

    /// Wildcard-resolved alias entry. `Some("")` is the explicit-ignore
    /// marker; `None` means the pack says nothing about this key.
    pub fn lookup_alias(&self, cachekey: u64, hash: u32) -> Option<&str> {
        lookup_wildcard(&self.aliases, cachekey, hash, self.ignore_address)
            .map(String::as_str)
    }

    /// Wildcard-resolved filtering override, with a fully global `(0, 0)`
    /// fallback so packs can force a default mode.
    pub fn lookup_filtering(&self, cachekey: u64, hash: u32) -> Option<TextureFiltering> {
        lookup_wildcard(&self.filtering, cachekey, hash, self.ignore_address)
            .or_else(|| self.filtering.get(&ReplacementCacheKey::new(0, 0)))
            .copied()
    }
}

fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    }
}
