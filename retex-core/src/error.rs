//! Typed configuration errors.
//!
//! Individual malformed table entries are logged and dropped during policy
//! parsing; only errors that make the whole pack untrustworthy (a missing or
//! unknown hash mode) surface here and keep the cache disabled.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The pack's options do not name a hash mode, so none of its hash
    /// entries can be matched against anything we compute.
    #[error("texture pack does not specify a hash mode")]
    MissingHashMode,

    /// The named hash mode is not one we can compute.
    #[error("unsupported hash mode: {0}")]
    UnsupportedHashMode(String),
}
