//! VFS error types.

use ratarmount_index::IndexError;
use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No member resolves, or the requested version is out of range.
    #[error("not found: {0}")]
    NotFound(String),

    /// Access mode other than read-only.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Malformed path argument.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No mount point for path.
    #[error("no mount point for path: {0}")]
    NoMountPoint(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Unknown or already released file handle.
    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),

    /// Index could not be opened.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Index does not have the expected layout.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create an Io error from a message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(io::Error::other(msg.into()))
    }

    /// Returns true for errors that must abort mounting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_) | Self::CorruptIndex(_))
    }

    /// POSIX error code reported across the filesystem callback boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) | Self::NoMountPoint(_) => libc::ENOENT,
            Self::PermissionDenied(_) => libc::EACCES,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::InvalidPath(_) | Self::NotASymlink(_) => libc::EINVAL,
            Self::InvalidHandle(_) => libc::EBADF,
            Self::IndexUnavailable(_) | Self::CorruptIndex(_) | Self::Io(_) => libc::EIO,
        }
    }
}

impl From<IndexError> for VfsError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Unavailable { .. } => Self::IndexUnavailable(e.to_string()),
            IndexError::Corrupt { .. } => Self::CorruptIndex(e.to_string()),
            IndexError::Query(e) => Self::Io(io::Error::other(e)),
            IndexError::Io(e) => Self::Io(e),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) | VfsError::NoMountPoint(msg) => {
                io::Error::new(io::ErrorKind::NotFound, msg)
            }
            VfsError::PermissionDenied(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::InvalidPath(msg) | VfsError::NotASymlink(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::InvalidHandle(fh) => {
                io::Error::new(io::ErrorKind::InvalidInput, format!("invalid file handle {fh}"))
            }
            VfsError::IndexUnavailable(msg) | VfsError::CorruptIndex(msg) => io::Error::other(msg),
            VfsError::Io(e) => e,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
