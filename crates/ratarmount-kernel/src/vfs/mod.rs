//! Virtual Filesystem over indexed archives.
//!
//! Key components:
//!
//! - [`VfsOps`] - Core trait for read-only filesystem operations
//! - [`ArchiveFs`] - One archive served from its member index
//! - [`MountTable`] - Several archives under one tree
//! - [`VersionSelector`] - Which of several same-path members to serve
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   The FUSE bridge handles inode ↔ path mapping locally.
//! - **Handle-based reads**: `open` resolves once and pins the record, so
//!   later reads never query the index.
//! - **Mount on demand**: archives inside archives are mounted the first
//!   time a path reaches into them, once per session.

mod archive;
mod blocking;
mod content;
mod error;
mod fs;
mod handles;
mod loader;
mod mount;
mod ops;
pub mod path;
mod source;
mod types;
mod version;

pub use archive::{ArchiveMount, Located, ResolvedNode};
pub use error::{VfsError, VfsResult};
pub use fs::{ArchiveFs, ArchiveFsBuilder};
pub use handles::{HandleTable, OpenFileHandle};
pub use loader::{IndexLoader, SidecarIndexLoader};
pub use mount::{MountInfo, MountTable};
pub use ops::VfsOps;
pub use source::MountSource;
pub use types::{DirEntry, FileAttr, FileHandle, FileType, OpenFlags, StatFs};
pub use version::VersionSelector;
