//! Runtime texture replacement cache.
//!
//! Maps a rendering engine's in-flight texture uploads to replacement image
//! data supplied by a texture pack, and asynchronously dumps newly seen
//! textures back to storage so pack authors can pick them up.
//!
//! The render/decode path talks to [`TextureReplacer`]:
//! - [`TextureReplacer::compute_hash`] fingerprints an upload,
//! - [`TextureReplacer::find_replacement`] resolves it to a shared
//!   [`ReplacedTexture`] handle (or a memoized "no replacement"),
//! - [`TextureReplacer::decimate`] runs the periodic eviction sweep,
//! - [`TextureReplacer::notify_texture_decoded`] queues background saves.
//!
//! Storage, emulated memory and task execution are collaborator traits
//! ([`store::ByteStore`], [`memory::MemoryAccessor`],
//! [`scheduler::TaskScheduler`]) so the cache stays decoupled from the
//! frontend's backends.

pub mod formats;
pub mod memory;
pub mod replaced;
pub mod replacer;
pub mod saver;
pub mod scheduler;
pub mod store;

pub use formats::{FormatSupport, TextureFormat};
pub use memory::{MemoryAccessor, VecMemory};
pub use replaced::ReplacedTexture;
pub use replacer::{ReplacerDecimateMode, ReplacerSettings, TextureReplacer};
pub use saver::ReplacedTextureDecodeInfo;
pub use scheduler::{Task, TaskPriority, TaskScheduler, TaskType, WorkerPool};
pub use store::{ByteStore, DirectoryStore, ZipStore};
