//! VFS operations trait.
//!
//! Path-based and read-only. The FUSE bridge keeps its own inode ↔ path
//! map and calls through this trait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::VfsResult;
use super::types::{DirEntry, FileAttr, FileHandle, OpenFlags, StatFs};
use super::version::VersionSelector;

/// Core VFS operations trait.
///
/// Paths are absolute within the backend (`/` is its root). The
/// [`MountTable`](super::MountTable) translates paths before delegating.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Lookup
    // ========================================================================

    /// Get attributes of the most recent version.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, `.` and `..` included.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read symbolic link target.
    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;

    /// Attributes of every stored version of `path`, oldest first.
    async fn versions(&self, path: &Path) -> VfsResult<Vec<FileAttr>>;

    // ========================================================================
    // Content
    // ========================================================================

    /// Open a specific version of `path`.
    ///
    /// Any access mode other than read-only fails with `PermissionDenied`.
    async fn open_version(
        &self,
        path: &Path,
        flags: OpenFlags,
        version: VersionSelector,
    ) -> VfsResult<FileHandle>;

    /// Read up to `size` bytes at `offset`.
    ///
    /// Returns fewer bytes at the end of the member and none past it.
    async fn read(&self, fh: FileHandle, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Discard a handle.
    async fn release(&self, fh: FileHandle) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Always true for archive mounts.
    fn read_only(&self) -> bool {
        true
    }

    /// Get filesystem statistics.
    async fn statfs(&self) -> VfsResult<StatFs>;

    /// Release resources held for the session. Called on unmount.
    async fn close(&self) {}

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Open the most recent version of `path`.
    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        self.open_version(path, flags, VersionSelector::MostRecent)
            .await
    }

    /// Read one version of a file in full.
    async fn read_all(&self, path: &Path, version: VersionSelector) -> VfsResult<Vec<u8>> {
        const CHUNK: u32 = 128 * 1024;

        let fh = self.open_version(path, OpenFlags::read(), version).await?;
        let mut data = Vec::new();
        let result = loop {
            match self.read(fh, data.len() as u64, CHUNK).await {
                Ok(chunk) if chunk.is_empty() => break Ok(()),
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => break Err(e),
            }
        };
        self.release(fh).await?;
        result.map(|()| data)
    }
}
