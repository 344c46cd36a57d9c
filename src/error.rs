//! Contractual error kinds.
//!
//! Most of the crate reports errors through `anyhow` with contextual
//! messages, the same way the rest of the build pipeline does. The kinds
//! below are the conditions callers are expected to react to; they are
//! attached to the `anyhow` chain and recoverable with `downcast_ref`.

use thiserror::Error;

/// Error conditions with a defined meaning for callers.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A package source argument could not be classified as URL, file, or
    /// directory.
    #[error("failed to resolve {argument} '{value}'")]
    SourceResolution { argument: String, value: String },

    /// Package contents do not fit in the requested image capacity.
    #[error("contents do not fit in image: need {needed} bytes, capacity is {capacity} bytes")]
    SizeExceeded { needed: u64, capacity: u64 },

    /// A path component violates filesystem name constraints.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// An unsupported output format string, or metadata that fails
    /// validation before encoding.
    #[error("{0}")]
    InvalidFormat(String),

    /// The destination already exists and force was not given.
    #[error("{kind} '{path}' already exists (use '--force' to overwrite)")]
    DestinationConflict { kind: &'static str, path: String },

    /// Malformed or inconsistent on-disk filesystem structures.
    #[error("cannot read filesystem: {0}")]
    InodeResolution(String),

    /// A failure isolated to the deferred symlink creation pass. The tree
    /// walk has already completed when this is raised.
    #[error("creating symlink '{link}' -> '{target}': {detail}")]
    SymlinkPhase {
        link: String,
        target: String,
        detail: String,
    },
}
