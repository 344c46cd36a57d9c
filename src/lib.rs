//! Turns declarative application packages into bootable VM disk images.
//!
//! A package is a file tree, a machine configuration, and an optional icon.
//! The build pipeline lays the tree out as an ext2 filesystem, splices in a
//! kernel behind an MBR boot sector, and encodes the result into one of the
//! supported hypervisor container formats. The extract pipeline is the
//! inverse: it parses the filesystem structures of a built image directly
//! from bytes — no mounting — and reconstructs the file tree on the host.
//!
//! # Architecture
//!
//! ```text
//! package::Builder ──> ext2::layout ──> disk::assemble ──> disk encoders
//!   (tree + config)    (filesystem)     (raw bootable)     (raw/vmdk/vhd/
//!                                                           xva/gcp)
//!
//! extract::extract_image <── ext2::Reader <── existing disk image
//! ```
//!
//! Both pipelines are sequential: layout completes before assembly,
//! assembly before encoding, and the extraction tree walk completes before
//! deferred symlinks are applied.

pub mod config;
pub mod disk;
pub mod error;
pub mod ext2;
pub mod extract;
pub mod kernel;
pub mod package;
pub mod provision;

pub use error::BuildError;
