//! The two-tier replacement cache.
//!
//! The fast tier maps an exact (cachekey, hash) pair to its resolution
//! result, including negative results for explicitly ignored textures. The
//! second tier is keyed by the canonical identity string (the resolved
//! filename set) and is the single creation authority for
//! [`ReplacedTexture`] handles: every key that resolves to the same files
//! shares one handle.
//!
//! All lookups run on the render/decode thread and do no I/O; handle
//! construction is deliberately lazy about pixel data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use retex_core::{
    hash, hash_name, PackConfig, ReplacementCacheKey, ReplacerPolicy, TextureFiltering,
    MAX_REPLACEMENT_MIP_LEVELS,
};

use crate::formats::{FormatSupport, TextureFormat};
use crate::memory::MemoryAccessor;
use crate::replaced::{ReplacedDesc, ReplacedTexture};
use crate::saver::{ReplacedTextureDecodeInfo, SaveTextureTask, SavedTextureCacheData};
use crate::scheduler::TaskScheduler;
use crate::store::{open_pack, ByteStore};

/// Staging directory for newly dumped textures, under the pack root.
const NEW_TEXTURE_DIR: &str = "new";

/// Resident size at which the normal decimation sweep reaches its most
/// aggressive age threshold.
const MAX_CACHE_SIZE_GB: f64 = 4.0;

/// Texture height used by full-screen allocations; uploads at this height
/// often carry unused padding rows that the max-seen clamp skips.
const FULL_HEIGHT_SENTINEL: u32 = 512;

/// System/UI textures live in this range of the guest address space and are
/// never worth dumping.
const SYSTEM_TEXTURE_START: u32 = 0x0500_0000;
const SYSTEM_TEXTURE_END: u32 = 0x0840_0000;

/// How aggressively [`TextureReplacer::decimate`] purges handle payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacerDecimateMode {
    /// Age threshold adapts to the last measured resident size.
    Normal,
    /// The frontend reported memory pressure; purge anything idle for 90s.
    UnderPressure,
    /// Clear all payloads unconditionally.
    Forced,
}

/// Frontend-level switches, orthogonal to the pack's own options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplacerSettings {
    pub replace_textures: bool,
    pub save_new_textures: bool,
}

/// Fast-tier entry: a resolved handle, or a memoized negative result.
enum CacheEntry {
    /// Explicitly ignored by the pack; don't resolve again.
    Ignored,
    Texture {
        #[allow(dead_code)]
        hashfiles: String,
        texture: Arc<ReplacedTexture>,
    },
}

/// Runtime cache mapping in-flight texture uploads to replacement handles
/// and dumping unseen textures in the background.
pub struct TextureReplacer {
    enabled: bool,
    settings: ReplacerSettings,
    policy: ReplacerPolicy,
    base_path: PathBuf,
    new_texture_dir: PathBuf,
    store: Option<Arc<dyn ByteStore>>,
    format_support: FormatSupport,
    scheduler: Arc<dyn TaskScheduler>,

    /// Fast tier, exact key -> resolution result.
    cache: HashMap<ReplacementCacheKey, CacheEntry>,
    /// Canonical-identity tier, hashfiles string -> the one shared handle.
    level_cache: HashMap<String, Arc<ReplacedTexture>>,
    /// What has been dumped this session.
    saved_cache: HashMap<ReplacementCacheKey, SavedTextureCacheData>,

    /// Resident size measured by the previous sweep, feeding the next one.
    last_cache_size_gb: f64,
    /// How many times alias resolution actually ran (i.e. fast-tier misses).
    alias_resolutions: u64,
}

impl TextureReplacer {
    /// Create a disabled replacer. Call [`Self::notify_config_changed`] to
    /// point it at a pack and enable it.
    pub fn new(format_support: FormatSupport, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            enabled: false,
            settings: ReplacerSettings::default(),
            policy: ReplacerPolicy::default(),
            base_path: PathBuf::new(),
            new_texture_dir: PathBuf::new(),
            store: None,
            format_support,
            scheduler,
            cache: HashMap::new(),
            level_cache: HashMap::new(),
            saved_cache: HashMap::new(),
            last_cache_size_gb: 0.0,
            alias_resolutions: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Rebuild policy and storage after a configuration change.
    ///
    /// The cache ends up enabled only when replacement or saving is switched
    /// on, `base_path` is an existing directory, and the pack configuration
    /// (if there is one) loads cleanly. Dropping from enabled to disabled
    /// releases the byte store and force-purges all handle payloads.
    pub fn notify_config_changed(
        &mut self,
        settings: ReplacerSettings,
        base_path: &Path,
        pack: Option<&PackConfig>,
    ) {
        let was_enabled = self.enabled;
        self.settings = settings;
        self.enabled = settings.replace_textures || settings.save_new_textures;

        if self.enabled {
            self.base_path = base_path.to_path_buf();
            self.new_texture_dir = base_path.join(NEW_TEXTURE_DIR);

            // If we're saving, auto-create the staging directory.
            if settings.save_new_textures && !self.new_texture_dir.exists() {
                if let Err(err) = std::fs::create_dir_all(&self.new_texture_dir) {
                    log::error!(
                        "Failed to create {:?}: {}",
                        self.new_texture_dir,
                        err
                    );
                }
            }

            self.enabled = self.base_path.is_dir();
        } else if was_enabled {
            self.store = None;
            self.decimate(ReplacerDecimateMode::Forced);
        }

        if self.enabled {
            self.enabled = self.load_pack(pack);
        }
    }

    fn load_pack(&mut self, pack: Option<&PackConfig>) -> bool {
        self.policy = match pack {
            Some(config) => match ReplacerPolicy::from_config(config) {
                Ok(policy) => policy,
                Err(err) => {
                    log::error!("Failed to load texture pack configuration: {}", err);
                    return false;
                }
            },
            None => {
                // A pack without a lookup file is still usable with defaults.
                log::warn!("Texture pack lacking a lookup file: {:?}", self.base_path);
                ReplacerPolicy::default()
            }
        };

        self.store = Some(open_pack(&self.base_path));
        true
    }

    pub fn policy(&self) -> &ReplacerPolicy {
        &self.policy
    }

    /// Fingerprint the pixel data of an upload.
    ///
    /// Panics if the cache is disabled; callers own the enablement check.
    pub fn compute_hash(
        &self,
        mem: &dyn MemoryAccessor,
        addr: u32,
        bufw: u32,
        w: u32,
        h: u32,
        fmt: TextureFormat,
        max_seen_v: u16,
    ) -> u32 {
        assert!(self.enabled, "texture replacement not enabled");

        let (mut w, mut h) = (w, h);
        match self.policy.lookup_hash_range(addr, w, h) {
            Some((new_w, new_h)) => {
                w = new_w;
                h = new_h;
            }
            None => {
                // No hash range; clamp full-height allocations to the rows
                // actually sampled so padding doesn't pollute the hash.
                if h == FULL_HEIGHT_SENTINEL
                    && max_seen_v != 0
                    && (max_seen_v as u32) < FULL_HEIGHT_SENTINEL
                {
                    h = max_seen_v as u32;
                }
            }
        }

        let reduce = if self.policy.reduce_hash {
            self.policy.lookup_reduce_hash_range(w, h)
        } else {
            1.0
        };

        let bpp = fmt.bits_per_pixel();
        if bufw <= w {
            // The data is contiguous; hash the used pixels as one run.
            let total_pixels = bufw * h + (w - bufw);
            let size_in_ram = ((bpp * total_pixels / 8) as f32 * reduce) as usize;
            let Some(data) = mem.read_bytes(addr, size_in_ram) else {
                log::error!("Texture hash read out of bounds: {:08x}", addr);
                return 0;
            };
            hash::hash_bytes(self.policy.hash_mode, data)
        } else {
            // Row gaps; hash each row and fold in order.
            let bytes_per_line = ((bpp * w / 8) as f32 * reduce) as usize;
            let stride = (bpp * bufw / 8) as usize;
            let len = stride * (h as usize).saturating_sub(1) + bytes_per_line;
            let Some(data) = mem.read_bytes(addr, len) else {
                log::error!("Texture hash read out of bounds: {:08x}", addr);
                return 0;
            };
            hash::hash_rows(self.policy.hash_mode, data, stride, bytes_per_line, h as usize)
        }
    }

    /// Resolve an upload to its shared replacement handle, if any.
    ///
    /// The common case is a fast-tier hit and costs one hash lookup. Misses
    /// run alias resolution, then consult the canonical-identity tier before
    /// constructing a new handle, which guarantees at most one handle per
    /// distinct file set.
    pub fn find_replacement(
        &mut self,
        cachekey: u64,
        hash: u32,
        w: u32,
        h: u32,
    ) -> Option<Arc<ReplacedTexture>> {
        // Only actually replace if we're replacing. We might just be saving.
        if !self.enabled || !self.settings.replace_textures {
            return None;
        }

        let key = ReplacementCacheKey::new(cachekey, hash);
        if let Some(entry) = self.cache.get(&key) {
            return match entry {
                CacheEntry::Ignored => None,
                CacheEntry::Texture { texture, .. } => Some(texture.clone()),
            };
        }

        // The hash range is keyed by the real address even when address
        // context is otherwise ignored.
        let (new_w, new_h) = self
            .policy
            .lookup_hash_range((cachekey >> 32) as u32, w, h)
            .unwrap_or((w, h));

        let mut lookup_key = cachekey;
        if self.policy.ignore_address {
            lookup_key &= 0xFFFF_FFFF;
        }

        let alias = self.lookup_hash_file(lookup_key, hash);
        if alias.as_deref() == Some("") {
            // Explicitly ignored; memoize the negative so repeated lookups
            // skip resolution entirely.
            self.cache.insert(key, CacheEntry::Ignored);
            return None;
        }

        let force_filtering = self.policy.lookup_filtering(lookup_key, hash);

        let (filenames, hashfiles) = match alias {
            Some(alias) => {
                let filenames = alias.split('|').map(str::to_owned).collect();
                (filenames, alias)
            }
            None => {
                // No alias; generate the default per-level names. PNG is
                // what the save path dumps, so that's what we look for.
                let filenames: Vec<String> = (0..MAX_REPLACEMENT_MIP_LEVELS)
                    .map(|level| format!("{}.png", hash_name(lookup_key, hash, level)))
                    .collect();
                let hashfiles = filenames[0].clone();
                (filenames, hashfiles)
            }
        };

        // Another key may already have resolved to the same file set.
        if let Some(texture) = self.level_cache.get(&hashfiles) {
            let texture = texture.clone();
            self.cache.insert(
                key,
                CacheEntry::Texture {
                    hashfiles,
                    texture: texture.clone(),
                },
            );
            return Some(texture);
        }

        let store = self.store.clone()?;
        let desc = ReplacedDesc {
            log_id: hashfiles.clone(),
            hashfiles: hashfiles.clone(),
            filenames,
            w,
            h,
            new_w,
            new_h,
            force_filtering,
            base_path: self.base_path.clone(),
            format_support: self.format_support,
        };
        let texture = Arc::new(ReplacedTexture::new(store, desc));

        self.cache.insert(
            key,
            CacheEntry::Texture {
                hashfiles: hashfiles.clone(),
                texture: texture.clone(),
            },
        );
        self.level_cache.insert(hashfiles, texture.clone());
        Some(texture)
    }

    /// Forced filtering for an upload, resolved independently of whether a
    /// replacement exists.
    pub fn find_filtering(&self, cachekey: u64, hash: u32) -> Option<TextureFiltering> {
        if !self.enabled || !self.settings.replace_textures {
            return None;
        }
        let mut lookup_key = cachekey;
        if self.policy.ignore_address {
            lookup_key &= 0xFFFF_FFFF;
        }
        self.policy.lookup_filtering(lookup_key, hash)
    }

    /// Wildcard alias resolution, counted so tests (and stats) can observe
    /// how often the slow path runs. `Some("")` means explicitly ignored.
    fn lookup_hash_file(&mut self, cachekey: u64, hash: u32) -> Option<String> {
        self.alias_resolutions += 1;
        self.policy.lookup_alias(cachekey, hash).map(str::to_owned)
    }

    /// Number of times alias resolution has run.
    pub fn alias_resolutions(&self) -> u64 {
        self.alias_resolutions
    }

    /// Age/size-adaptive eviction sweep.
    ///
    /// Purges decoded payloads inside handles that have been idle longer
    /// than the mode's age threshold; never removes cache entries, so later
    /// lookups reload lazily instead of re-resolving. The measured resident
    /// size feeds back into the next `Normal` sweep's threshold.
    pub fn decimate(&mut self, mode: ReplacerDecimateMode) {
        let age = match mode {
            ReplacerDecimateMode::Forced => Duration::ZERO,
            ReplacerDecimateMode::UnderPressure => Duration::from_secs(90),
            ReplacerDecimateMode::Normal => {
                if self.last_cache_size_gb > 1.0 {
                    let pressure =
                        self.last_cache_size_gb.min(MAX_CACHE_SIZE_GB) / MAX_CACHE_SIZE_GB;
                    // Get more aggressive the closer we are to the max.
                    Duration::from_secs_f64(90.0 + (1.0 - pressure) * 1710.0)
                } else {
                    // Replacements are large but we can afford to keep them
                    // around for a long time at this size.
                    Duration::from_secs(1800)
                }
            }
        };

        let mut total_size: usize = 0;
        for texture in self.level_cache.values() {
            // Each handle serializes against its own lock only; concurrent
            // lazy loads in other handles are unaffected.
            total_size += texture.purge_if_older_than(age);
        }

        let total_size_gb = total_size as f64 / (1024.0 * 1024.0 * 1024.0);
        if total_size_gb >= 1.0 {
            log::warn!(
                "Decimated replacements older than {:?}, currently using {:.2} GB of RAM",
                age,
                total_size_gb
            );
        }
        self.last_cache_size_gb = total_size_gb;
    }

    /// Whether [`Self::notify_texture_decoded`] would save this upload.
    ///
    /// Panics if the cache is disabled; callers own the enablement check.
    pub fn will_save(&self, info: &ReplacedTextureDecodeInfo) -> bool {
        assert!(self.enabled, "texture replacement not enabled");
        if !self.settings.save_new_textures {
            return false;
        }
        // Don't dump system/UI textures.
        if info.addr > SYSTEM_TEXTURE_START && info.addr < SYSTEM_TEXTURE_END {
            return false;
        }
        if info.is_video && !self.policy.allow_video {
            return false;
        }
        true
    }

    /// Queue a background dump of a just-decoded texture.
    ///
    /// De-duplicated per (cachekey, hash, level) for the session; the record
    /// is written before the task is queued, so a second decode of the same
    /// content is dropped even while the first write is still in flight.
    /// `data` is the caller's decoded RGBA buffer with `pitch` bytes per
    /// row; the relevant sub-rectangle is copied out before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn notify_texture_decoded(
        &mut self,
        info: &ReplacedTextureDecodeInfo,
        data: &[u8],
        pitch: usize,
        level: usize,
        orig_w: u32,
        orig_h: u32,
        scaled_w: u32,
        scaled_h: u32,
    ) {
        assert!(self.enabled, "texture replacement not enabled");
        if !self.will_save(info) {
            return;
        }
        if self.policy.ignore_mipmap && level > 0 {
            return;
        }

        let mut cachekey = info.cachekey;
        if self.policy.ignore_address {
            cachekey &= 0xFFFF_FFFF;
        }

        // An alias (or explicit ignore) means the pack already covers this
        // key; replacement and capture are mutually exclusive.
        if self.lookup_hash_file(cachekey, info.hash).is_some() {
            return;
        }

        let key = ReplacementCacheKey::new(cachekey, info.hash);
        if let Some(record) = self.saved_cache.get(&key) {
            if record.level_saved.get(level).copied().unwrap_or(true) {
                // Already saved this session; changing scale factors at
                // runtime is not worth chasing.
                log::debug!(
                    "Already saved {} {}s ago, skipping",
                    key,
                    record.last_saved.elapsed().as_secs()
                );
                return;
            }
        }

        // Only save the hashed portion, scaled to the decoded resolution.
        let (mut w, mut h) = (scaled_w, scaled_h);
        if let Some((lookup_w, lookup_h)) = self.policy.lookup_hash_range(info.addr, orig_w, orig_h)
        {
            w = lookup_w * (scaled_w / orig_w);
            h = lookup_h * (scaled_h / orig_h);
        }

        // Copy the rectangle to an owned buffer for the task, compacting
        // away the pitch while we're at it.
        let row_bytes = w as usize * 4;
        let mut save_buf = vec![0u8; row_bytes * h as usize];
        for y in 0..h as usize {
            let src = &data[y * pitch..y * pitch + row_bytes];
            save_buf[y * row_bytes..(y + 1) * row_bytes].copy_from_slice(src);
        }

        let hashfile = format!("{}.png", hash_name(cachekey, info.hash, level));
        let save_directory = hashfile
            .rfind('/')
            .map(|slash| self.new_texture_dir.join(&hashfile[..slash]));

        self.scheduler.enqueue(Box::new(SaveTextureTask {
            rgba: save_buf,
            w,
            h,
            replacement_file: self.base_path.join(&hashfile),
            save_file: self.new_texture_dir.join(&hashfile),
            save_directory,
            info_hash: info.hash,
        }));

        // Remember that we've saved this, before the write has finished.
        let record = self.saved_cache.entry(key).or_default();
        if level < MAX_REPLACEMENT_MIP_LEVELS {
            record.level_w[level] = w;
            record.level_h[level] = h;
            record.level_saved[level] = true;
        }
        record.last_saved = std::time::Instant::now();
    }

    /// Dimensions a level was dumped at this session, if it was.
    pub fn saved_dimensions(&self, cachekey: u64, hash: u32, level: usize) -> Option<(u32, u32)> {
        self.saved_cache
            .get(&ReplacementCacheKey::new(cachekey, hash))
            .and_then(|record| record.saved_dimensions(level))
    }
}
