//! Core types for the retex texture replacement cache.
//!
//! This crate holds the pure, I/O-free half of the system:
//! - Cache keys identifying observed texture uploads ([`key`])
//! - Content hashing of texture regions ([`hash`])
//! - Wildcard key relaxation for author-specified overrides ([`wildcard`])
//! - The immutable replacement policy rebuilt on configuration reload ([`policy`])
//!
//! Everything that touches storage, emulated memory or background threads
//! lives in `retex-runtime`.

pub mod error;
pub mod hash;
pub mod key;
pub mod policy;
pub mod wildcard;

pub use error::PolicyError;
pub use hash::ReplacementHash;
pub use key::{hash_name, ReplacementCacheKey, MAX_REPLACEMENT_MIP_LEVELS};
pub use policy::{PackConfig, ReplacerPolicy, TextureFiltering};
