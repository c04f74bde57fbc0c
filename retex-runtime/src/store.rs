//! Byte stores backing a texture pack.
//!
//! A pack is either a plain directory of image files or a zip archive (which
//! cuts I/O and file-handle churn on platforms where that matters). Both are
//! exposed through the same trait; replacement handles hold the store behind
//! an `Arc` and load lazily through it.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use zip::ZipArchive;

/// Filename of the archive checked before falling back to the directory.
pub const PACK_ARCHIVE_NAME: &str = "textures.zip";

/// Read-only access to a pack's files by relative path.
pub trait ByteStore: Send + Sync {
    /// Read the whole file at `path`.
    fn open(&self, path: &str) -> Result<Vec<u8>>;

    /// Whether `path` exists without reading it.
    fn exists(&self, path: &str) -> bool;
}

/// Pack backed by a plain directory.
pub struct DirectoryStore {
    base: PathBuf,
}

impl DirectoryStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ByteStore for DirectoryStore {
    fn open(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.base.join(path);
        std::fs::read(&full).with_context(|| format!("Failed to read {:?}", full))
    }

    fn exists(&self, path: &str) -> bool {
        self.base.join(path).exists()
    }
}

/// Pack backed by a zip archive.
///
/// The archive reader seeks, so access is serialized behind a mutex; loads
/// are rare (first touch of each level) and the decoded data is cached in
/// the handle anyway.
pub struct ZipStore {
    archive: Mutex<ZipArchive<File>>,
}

impl ZipStore {
    pub fn open_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open archive {:?}", path))?;
        let archive =
            ZipArchive::new(file).with_context(|| format!("Not a zip archive: {:?}", path))?;
        Ok(Self {
            archive: Mutex::new(archive),
        })
    }
}

impl ByteStore for ZipStore {
    fn open(&self, path: &str) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock().expect("zip store lock poisoned");
        let mut entry = archive
            .by_name(path)
            .with_context(|| format!("No such archive entry: {}", path))?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        Ok(data)
    }

    fn exists(&self, path: &str) -> bool {
        let archive = self.archive.lock().expect("zip store lock poisoned");
        archive.index_for_name(path).is_some()
    }
}

/// Open the store for a pack rooted at `base`: the zip archive if one is
/// present and readable, the directory itself otherwise.
pub fn open_pack(base: &Path) -> Arc<dyn ByteStore> {
    let zip_path = base.join(PACK_ARCHIVE_NAME);
    match ZipStore::open_path(&zip_path) {
        Ok(store) => {
            log::info!("Texture pack activated from {:?}", zip_path);
            Arc::new(store)
        }
        Err(_) => {
            log::info!(
                "{:?} wasn't a zip file - opening the directory {:?} instead",
                zip_path,
                base
            );
            Arc::new(DirectoryStore::new(base))
        }
    }
}
