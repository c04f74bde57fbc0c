//! The shared replacement texture handle.
//!
//! One `ReplacedTexture` exists per distinct set of replacement files, no
//! matter how many cache keys resolve to it. The handle is created without
//! doing any I/O; level pixel data is decoded on first access and can be
//! purged again by the decimation sweep, after which the next access simply
//! reloads it. Purge state and timestamps are guarded by the handle's own
//! mutex so the top-level cache tables never need locking for this.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::RgbaImage;
use retex_core::TextureFiltering;

use crate::formats::FormatSupport;
use crate::store::ByteStore;

/// Everything needed to construct a handle, resolved by the cache.
#[derive(Debug, Clone)]
pub struct ReplacedDesc {
    /// Per-level replacement filenames, level 0 first.
    pub filenames: Vec<String>,
    /// Human-readable identity for log lines.
    pub log_id: String,
    /// Canonical identity string; the union of the per-level filenames.
    pub hashfiles: String,
    /// Dimensions of the original upload.
    pub w: u32,
    pub h: u32,
    /// Override dimensions from a hash range, or the original ones.
    pub new_w: u32,
    pub new_h: u32,
    pub force_filtering: Option<TextureFiltering>,
    /// Root of the pack on disk, for diagnostics and save-path checks.
    pub base_path: PathBuf,
    pub format_support: FormatSupport,
}

enum LevelPayload {
    /// Not loaded yet, or purged since.
    Unloaded,
    /// Load failed once; don't hit storage again until purged.
    NotFound,
    Loaded(Arc<RgbaImage>),
}

impl LevelPayload {
    fn data_size(&self) -> usize {
        match self {
            LevelPayload::Loaded(image) => (image.width() * image.height() * 4) as usize,
            _ => 0,
        }
    }
}

struct ReplacedState {
    levels: Vec<LevelPayload>,
    last_used: Instant,
}

/// A lazily-populated replacement image set, shared across every cache key
/// whose resolution lands on the same files.
pub struct ReplacedTexture {
    desc: ReplacedDesc,
    store: Arc<dyn ByteStore>,
    state: Mutex<ReplacedState>,
}

impl ReplacedTexture {
    /// Construct without touching storage; decode happens on first access.
    pub fn new(store: Arc<dyn ByteStore>, desc: ReplacedDesc) -> Self {
        let levels = desc.filenames.iter().map(|_| LevelPayload::Unloaded).collect();
        Self {
            desc,
            store,
            state: Mutex::new(ReplacedState {
                levels,
                last_used: Instant::now(),
            }),
        }
    }

    pub fn log_id(&self) -> &str {
        &self.desc.log_id
    }

    pub fn hashfiles(&self) -> &str {
        &self.desc.hashfiles
    }

    /// Dimensions the replacement should be sampled at.
    pub fn target_dims(&self) -> (u32, u32) {
        (self.desc.new_w, self.desc.new_h)
    }

    pub fn force_filtering(&self) -> Option<TextureFiltering> {
        self.desc.force_filtering
    }

    pub fn format_support(&self) -> FormatSupport {
        self.desc.format_support
    }

    pub fn num_levels(&self) -> usize {
        self.desc.filenames.len()
    }

    /// Pixel data for one mip level, decoding it on first access.
    ///
    /// Refreshes the last-used timestamp either way. Returns `None` when the
    /// level has no filename, the file is missing, or it fails to decode;
    /// the failure is remembered so storage is not probed on every draw.
    pub fn level(&self, level: usize) -> Option<Arc<RgbaImage>> {
        let mut state = self.state.lock().expect("replaced texture lock poisoned");
        state.last_used = Instant::now();
        let payload = state.levels.get_mut(level)?;
        match payload {
            LevelPayload::Loaded(image) => Some(image.clone()),
            LevelPayload::NotFound => None,
            LevelPayload::Unloaded => {
                let loaded = self.load_level(level);
                *payload = match &loaded {
                    Some(image) => LevelPayload::Loaded(image.clone()),
                    None => LevelPayload::NotFound,
                };
                loaded
            }
        }
    }

    fn load_level(&self, level: usize) -> Option<Arc<RgbaImage>> {
        let filename = self.desc.filenames.get(level)?;
        if filename.is_empty() {
            return None;
        }
        let bytes = match self.store.open(filename) {
            Ok(bytes) => bytes,
            Err(err) => {
                if level == 0 {
                    log::debug!("No replacement file for {}: {:#}", self.desc.log_id, err);
                }
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(image) => {
                log::debug!("Loaded replacement level {} of {}", level, self.desc.log_id);
                Some(Arc::new(image.to_rgba8()))
            }
            Err(err) => {
                log::error!("Failed to decode {}: {}", filename, err);
                None
            }
        }
    }

    /// Drop decoded pixel data if the handle hasn't been touched within
    /// `age`, then report the resident size. The handle itself and its cache
    /// entries stay; the next access reloads.
    pub fn purge_if_older_than(&self, age: Duration) -> usize {
        let mut state = self.state.lock().expect("replaced texture lock poisoned");
        if state.last_used.elapsed() >= age {
            for payload in &mut state.levels {
                *payload = LevelPayload::Unloaded;
            }
        }
        state.levels.iter().map(LevelPayload::data_size).sum()
    }

    /// Resident decoded size in bytes.
    pub fn total_data_size(&self) -> usize {
        let state = self.state.lock().expect("replaced texture lock poisoned");
        state.levels.iter().map(LevelPayload::data_size).sum()
    }
}
