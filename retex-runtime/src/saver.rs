//! Background saving of newly seen textures.
//!
//! When saving is enabled, every texture the decode path reports gets one
//! chance per session to be written out as a PNG into the pack's `new/`
//! staging directory. The write itself runs as a detached low-priority task;
//! both I/O and PNG compression are slow enough that we never want the
//! decode path waiting on them.

use std::path::PathBuf;
use std::time::Instant;

use retex_core::MAX_REPLACEMENT_MIP_LEVELS;

use crate::scheduler::{Task, TaskPriority, TaskType};

/// Metadata about a just-decoded texture upload, supplied by the decode path.
#[derive(Debug, Clone, Copy)]
pub struct ReplacedTextureDecodeInfo {
    pub cachekey: u64,
    pub hash: u32,
    /// Source address of the upload, for policy exclusions and hash ranges.
    pub addr: u32,
    /// Whether the pixels come from a decoded video frame.
    pub is_video: bool,
}

/// Per-key record of what has been saved this session.
///
/// Written synchronously before the save task is queued, so a second decode
/// of the same content is dropped even while the first write is in flight.
pub(crate) struct SavedTextureCacheData {
    pub level_w: [u32; MAX_REPLACEMENT_MIP_LEVELS],
    pub level_h: [u32; MAX_REPLACEMENT_MIP_LEVELS],
    pub level_saved: [bool; MAX_REPLACEMENT_MIP_LEVELS],
    pub last_saved: Instant,
}

impl Default for SavedTextureCacheData {
    fn default() -> Self {
        Self {
            level_w: [0; MAX_REPLACEMENT_MIP_LEVELS],
            level_h: [0; MAX_REPLACEMENT_MIP_LEVELS],
            level_saved: [false; MAX_REPLACEMENT_MIP_LEVELS],
            last_saved: Instant::now(),
        }
    }
}

impl SavedTextureCacheData {
    /// Dimensions this level was dumped at, if it has been this session.
    pub(crate) fn saved_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        if self.level_saved.get(level).copied().unwrap_or(false) {
            Some((self.level_w[level], self.level_h[level]))
        } else {
            None
        }
    }
}

/// Detached task writing one dumped texture as a PNG.
pub(crate) struct SaveTextureTask {
    /// Pitch-compacted RGBA pixels, `w * h * 4` bytes.
    pub rgba: Vec<u8>,
    pub w: u32,
    pub h: u32,
    /// Path of the matching replacement file; if the pack already ships one,
    /// there is nothing to dump.
    pub replacement_file: PathBuf,
    pub save_file: PathBuf,
    /// Subdirectory to create first, when an alias routes the dump into one.
    pub save_directory: Option<PathBuf>,
    pub info_hash: u32,
}

impl Task for SaveTextureTask {
    // I/O blocking so thread managers keep storage stalls off CPU workers,
    // and low priority so interactive work always goes first.
    fn task_type(&self) -> TaskType {
        TaskType::IoBlocking
    }

    fn priority(&self) -> TaskPriority {
        TaskPriority::Low
    }

    fn run(self: Box<Self>) {
        if self.save_file.exists() || self.replacement_file.exists() {
            return;
        }

        if let Some(dir) = &self.save_directory {
            if !dir.exists() {
                if let Err(err) = std::fs::create_dir_all(dir) {
                    log::error!("Failed to create {:?}: {}", dir, err);
                    return;
                }
            }
        }

        let result = image::save_buffer(
            &self.save_file,
            &self.rgba,
            self.w,
            self.h,
            image::ExtendedColorType::Rgba8,
        );
        match result {
            Ok(()) => log::info!(
                "Saving texture for replacement: {:08x} / {}x{} in {:?}",
                self.info_hash,
                self.w,
                self.h,
                self.save_file
            ),
            Err(err) => {
                log::error!("Failed to write {:?}: {}", self.save_file, err);
                // Leave nothing half-written; a retry happens next session.
                let _ = std::fs::remove_file(&self.save_file);
            }
        }
    }
}
