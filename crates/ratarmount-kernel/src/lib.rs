//! # ratarmount-kernel
//!
//! Read-only filesystem engine for indexed archives.
//!
//! An index-builder has already recorded every archive member (path,
//! offsets, size, metadata) in a SQLite index. This crate answers
//! lookups, listings and reads from that index and positional reads of the
//! archive, with:
//!
//! - member versions, when a path was appended more than once
//! - sparse members, whose holes read as zeros
//! - archives nested inside archives, mounted on demand
//!
//! The engine is transport-neutral; `ratarmount-cli` bridges it to FUSE.

pub mod config;
pub mod vfs;

pub use config::{ConfigError, Dispatch, MountConfig};
pub use vfs::{
    ArchiveFs, DirEntry, FileAttr, FileHandle, FileType, IndexLoader, MountTable, OpenFlags,
    StatFs, VersionSelector, VfsError, VfsOps, VfsResult,
};
