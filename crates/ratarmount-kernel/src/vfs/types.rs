//! Core VFS types.
//!
//! These types are path-based and transport-neutral; the FUSE bridge maps
//! them onto kernel replies.

use ratarmount_index::MemberRecord;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;
const S_IFLNK: u32 = libc::S_IFLNK as u32;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// Classify a full `st_mode`.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::File,
        }
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Full `st_mode`, type bits included.
    pub mode: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Number of hard links.
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileAttr {
    /// Attributes of a synthetic directory.
    pub fn directory(perm: u32) -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            mode: S_IFDIR | perm,
            mtime: UNIX_EPOCH,
            nlink: 2, // . and ..
            uid: 0,
            gid: 0,
        }
    }

    /// Map an index record to attributes.
    ///
    /// The link bit is added to the stored mode iff `linkname` is set.
    pub fn from_record(record: &MemberRecord) -> Self {
        let mut mode = record.mode;
        let kind = if record.is_symlink() {
            mode |= S_IFLNK;
            FileType::Symlink
        } else {
            FileType::from_mode(mode)
        };
        Self {
            size: record.size,
            kind,
            mode,
            mtime: mtime_from_secs(record.mtime),
            nlink: if kind.is_dir() { 2 } else { 1 },
            uid: record.uid,
            gid: record.gid,
        }
    }

    /// Attributes of a nested archive exposed as a directory.
    ///
    /// Whoever may read the archive may also search it.
    pub fn mounted_archive(record: &MemberRecord) -> Self {
        let perm = record.mode & 0o7777;
        Self {
            kind: FileType::Directory,
            mode: S_IFDIR | perm | ((perm & 0o444) >> 2),
            nlink: 2,
            ..Self::from_record(record)
        }
    }

    /// Permission bits.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

fn mtime_from_secs(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }

    /// The `.` and `..` entries every listing starts with.
    pub fn dots() -> Vec<Self> {
        vec![Self::directory("."), Self::directory("..")]
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Available blocks (to non-root).
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        // Nothing is ever free on a read-only mount.
        Self {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }
}

/// Open flags, as passed by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub i32);

impl Default for OpenFlags {
    fn default() -> Self {
        Self::read()
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self(libc::O_RDONLY)
    }

    /// Write-only access.
    pub fn write() -> Self {
        Self(libc::O_WRONLY)
    }

    /// Read and write access.
    pub fn read_write() -> Self {
        Self(libc::O_RDWR)
    }

    /// Returns true if the access mode is `O_RDONLY`.
    pub fn is_read_only(&self) -> bool {
        self.0 & libc::O_ACCMODE == libc::O_RDONLY
    }
}

/// Opaque handle returned by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle(pub u64);
