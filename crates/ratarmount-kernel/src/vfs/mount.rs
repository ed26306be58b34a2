//! VFS mount table with longest-prefix routing.
//!
//! Serves several archives under one tree. Handles returned by the table
//! are its own; each maps to a backend and the handle that backend issued.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::blocking;
use super::error::{VfsError, VfsResult};
use super::fs::ArchiveFs;
use super::ops::VfsOps;
use super::types::{DirEntry, FileAttr, FileHandle, OpenFlags, StatFs};
use super::version::VersionSelector;
use crate::config::MountConfig;

/// Information about a mount point.
#[derive(Debug, Clone)]
pub struct MountInfo {
    /// The mount path (e.g., "/backup.tar").
    pub path: PathBuf,
    /// Whether this mount is read-only.
    pub read_only: bool,
}

/// Routes filesystem operations to mounted backends.
///
/// Mount points are matched by longest prefix. For example, if `/mnt` and
/// `/mnt/project` are both mounted, a path like `/mnt/project/src/main.rs`
/// will be routed to the `/mnt/project` mount.
pub struct MountTable {
    /// Mount points, keyed by normalized path.
    mounts: RwLock<BTreeMap<PathBuf, Arc<dyn VfsOps>>>,
    handles: DashMap<u64, (Arc<dyn VfsOps>, FileHandle)>,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &"<locked>")
            .field("handles", &self.handles.len())
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    /// Create a new empty mount table.
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(BTreeMap::new()),
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Open every source named by `config` and mount it per
    /// [`MountConfig::layout`].
    pub async fn from_config(config: &MountConfig) -> VfsResult<Self> {
        let layout = config
            .layout()
            .map_err(|e| VfsError::invalid_path(e.to_string()))?;

        let table = Self::new();
        for (mount_path, source) in layout {
            let mut builder = ArchiveFs::builder(&source)
                .recursive(config.recursive)
                .pool(config.pool);
            if let Some(index) = &config.index {
                builder = builder.index(index);
            }
            let fs = blocking::run(move || builder.build()).await?;
            table.mount(mount_path, fs).await;
        }
        Ok(table)
    }

    /// Mount a filesystem at the given path.
    ///
    /// The path should be absolute (start with `/`). If a filesystem is
    /// already mounted at this path, it will be replaced.
    pub async fn mount(&self, path: impl Into<PathBuf>, fs: impl VfsOps + 'static) {
        self.mount_arc(path, Arc::new(fs)).await;
    }

    /// Mount a filesystem (already wrapped in Arc) at the given path.
    pub async fn mount_arc(&self, path: impl Into<PathBuf>, fs: Arc<dyn VfsOps>) {
        let path = Self::normalize_mount_path(path.into());
        tracing::info!(mount = %path.display(), "mounted");
        let replaced = self.mounts.write().await.insert(path, fs);
        if let Some(old) = replaced {
            self.forget_handles(&old);
            old.close().await;
        }
    }

    /// Unmount the filesystem at the given path and close it.
    ///
    /// Returns `true` if a mount was removed, `false` if nothing was mounted there.
    pub async fn unmount(&self, path: impl AsRef<Path>) -> bool {
        let path = Self::normalize_mount_path(path.as_ref().to_path_buf());
        let removed = self.mounts.write().await.remove(&path);
        match removed {
            Some(fs) => {
                self.forget_handles(&fs);
                fs.close().await;
                tracing::info!(mount = %path.display(), "unmounted");
                true
            }
            None => false,
        }
    }

    /// Unmount and close everything.
    pub async fn unmount_all(&self) {
        let mounts = std::mem::take(&mut *self.mounts.write().await);
        self.handles.clear();
        for (path, fs) in mounts {
            fs.close().await;
            tracing::info!(mount = %path.display(), "unmounted");
        }
    }

    /// List all current mounts.
    pub async fn list_mounts(&self) -> Vec<MountInfo> {
        let mounts = self.mounts.read().await;
        mounts
            .iter()
            .map(|(path, fs)| MountInfo {
                path: path.clone(),
                read_only: fs.read_only(),
            })
            .collect()
    }

    /// Number of handles currently open through the table.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn forget_handles(&self, fs: &Arc<dyn VfsOps>) {
        self.handles.retain(|_, (owner, _)| !Arc::ptr_eq(owner, fs));
    }

    /// Normalize a mount path: ensure it starts with `/` and has no trailing slash.
    fn normalize_mount_path(path: PathBuf) -> PathBuf {
        let s = path.to_string_lossy();
        let s = s.trim_end_matches('/');
        if s.is_empty() {
            PathBuf::from("/")
        } else if !s.starts_with('/') {
            PathBuf::from(format!("/{}", s))
        } else {
            PathBuf::from(s)
        }
    }

    /// Find the mount point for a given path.
    ///
    /// Returns the mount and the path within it (always absolute).
    async fn find_mount(&self, path: &Path) -> VfsResult<(Arc<dyn VfsOps>, PathBuf)> {
        let path_str = path.to_string_lossy();
        if !path_str.starts_with('/') {
            return Err(VfsError::invalid_path(path_str));
        }

        let mounts = self.mounts.read().await;

        // Find longest matching mount point
        let mut best_match: Option<(&PathBuf, &Arc<dyn VfsOps>)> = None;

        for (mount_path, fs) in mounts.iter() {
            let mount_str = mount_path.to_string_lossy();

            let is_match = if mount_str == "/" {
                true // Root matches everything
            } else {
                path_str == mount_str.as_ref()
                    || path_str.starts_with(&format!("{}/", mount_str))
            };

            if is_match
                && best_match
                    .is_none_or(|(best, _)| mount_path.as_os_str().len() > best.as_os_str().len())
            {
                best_match = Some((mount_path, fs));
            }
        }

        match best_match {
            Some((mount_path, fs)) => {
                let mount_str = mount_path.to_string_lossy();
                let relative = if mount_str == "/" {
                    path_str.trim_start_matches('/')
                } else {
                    path_str
                        .strip_prefix(mount_str.as_ref())
                        .unwrap_or("")
                        .trim_start_matches('/')
                };

                Ok((Arc::clone(fs), PathBuf::from(format!("/{relative}"))))
            }
            None => Err(VfsError::no_mount_point(path.display().to_string())),
        }
    }

    /// List the root directory, synthesizing entries from mount points.
    async fn list_root(&self) -> VfsResult<Vec<DirEntry>> {
        let mounts = self.mounts.read().await;
        let mut entries = Vec::new();
        let mut seen_names = HashSet::new();

        for (mount_path, fs) in mounts.iter() {
            let mount_str = mount_path.to_string_lossy();
            if mount_str == "/" {
                // Root mount: list its contents directly
                for entry in fs.readdir(Path::new("/")).await? {
                    if seen_names.insert(entry.name.clone()) {
                        entries.push(entry);
                    }
                }
            } else {
                // Non-root mount: extract first path component
                let first_component = mount_str
                    .trim_start_matches('/')
                    .split('/')
                    .next()
                    .unwrap_or("");

                if !first_component.is_empty() && seen_names.insert(first_component.to_string()) {
                    entries.push(DirEntry::directory(first_component));
                }
            }
        }

        for dot in DirEntry::dots() {
            if seen_names.insert(dot.name.clone()) {
                entries.push(dot);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn is_root(path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        path_str.is_empty() || path_str.trim_end_matches('/').is_empty()
    }
}

#[async_trait]
impl VfsOps for MountTable {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        if Self::is_root(path) {
            let mounts = self.mounts.read().await;
            if let Some(root_fs) = mounts.get(Path::new("/")) {
                return root_fs.getattr(Path::new("/")).await;
            }
            return Ok(FileAttr::directory(0o755));
        }

        let (fs, relative) = self.find_mount(path).await?;
        fs.getattr(&relative).await
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        if Self::is_root(path) {
            return self.list_root().await;
        }

        let (fs, relative) = self.find_mount(path).await?;
        fs.readdir(&relative).await
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let (fs, relative) = self.find_mount(path).await?;
        fs.readlink(&relative).await
    }

    async fn versions(&self, path: &Path) -> VfsResult<Vec<FileAttr>> {
        let (fs, relative) = self.find_mount(path).await?;
        fs.versions(&relative).await
    }

    async fn open_version(
        &self,
        path: &Path,
        flags: OpenFlags,
        version: VersionSelector,
    ) -> VfsResult<FileHandle> {
        let (fs, relative) = self.find_mount(path).await?;
        let inner = fs.open_version(&relative, flags, version).await?;
        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, (fs, inner));
        Ok(FileHandle(fh))
    }

    async fn read(&self, fh: FileHandle, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let (fs, inner) = self
            .handles
            .get(&fh.0)
            .map(|entry| (Arc::clone(&entry.0), entry.1))
            .ok_or(VfsError::InvalidHandle(fh.0))?;
        fs.read(inner, offset, size).await
    }

    async fn release(&self, fh: FileHandle) -> VfsResult<()> {
        let (_, (fs, inner)) = self
            .handles
            .remove(&fh.0)
            .ok_or(VfsError::InvalidHandle(fh.0))?;
        fs.release(inner).await
    }

    async fn statfs(&self) -> VfsResult<StatFs> {
        // Return stats from root mount if available
        let mounts = self.mounts.read().await;
        if let Some(root_fs) = mounts.get(Path::new("/")) {
            return root_fs.statfs().await;
        }
        Ok(StatFs::default())
    }

    async fn close(&self) {
        self.unmount_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratarmount_index::fixture::ArchiveImage;
    use tempfile::TempDir;

    fn archive(dir: &TempDir, name: &str, files: &[(&str, &str)]) -> ArchiveFs {
        let mut image = ArchiveImage::new();
        for (file, content) in files {
            image.add_file("", file, content.as_bytes());
        }
        let (archive, _) = image.write_to(dir.path(), name).unwrap();
        ArchiveFs::open(archive).unwrap()
    }

    async fn read(table: &MountTable, path: &str) -> VfsResult<Vec<u8>> {
        table
            .read_all(Path::new(path), VersionSelector::MostRecent)
            .await
    }

    #[tokio::test]
    async fn test_two_archives() {
        let dir = TempDir::new().unwrap();
        let table = MountTable::new();
        table
            .mount("/a.tar", archive(&dir, "a.tar", &[("x.txt", "from a")]))
            .await;
        table
            .mount("/b.tar", archive(&dir, "b.tar", &[("x.txt", "from b")]))
            .await;

        assert_eq!(read(&table, "/a.tar/x.txt").await.unwrap(), b"from a");
        assert_eq!(read(&table, "/b.tar/x.txt").await.unwrap(), b"from b");

        let root = table.readdir(Path::new("/")).await.unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "a.tar", "b.tar"]);
        assert!(root.iter().all(|e| e.kind.is_dir()));

        let attr = table.getattr(Path::new("/a.tar")).await.unwrap();
        assert!(attr.is_dir());
    }

    #[tokio::test]
    async fn test_root_mount() {
        let dir = TempDir::new().unwrap();
        let table = MountTable::new();
        table
            .mount("/", archive(&dir, "only.tar", &[("at-root.txt", "root file")]))
            .await;

        assert_eq!(read(&table, "/at-root.txt").await.unwrap(), b"root file");

        let root = table.readdir(Path::new("/")).await.unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "at-root.txt"]);
    }

    #[tokio::test]
    async fn test_handles_are_namespaced() {
        let dir = TempDir::new().unwrap();
        let table = MountTable::new();
        table.mount("/a.tar", archive(&dir, "a.tar", &[("f", "aaaa")])).await;
        table.mount("/b.tar", archive(&dir, "b.tar", &[("f", "bbbb")])).await;

        // Each backend hands out handle 1; the table must keep them apart.
        let fa = table.open(Path::new("/a.tar/f"), OpenFlags::read()).await.unwrap();
        let fb = table.open(Path::new("/b.tar/f"), OpenFlags::read()).await.unwrap();
        assert_ne!(fa, fb);
        assert_eq!(table.read(fa, 0, 4).await.unwrap(), b"aaaa");
        assert_eq!(table.read(fb, 0, 4).await.unwrap(), b"bbbb");

        table.release(fa).await.unwrap();
        assert!(matches!(table.read(fa, 0, 4).await, Err(VfsError::InvalidHandle(_))));
        assert_eq!(table.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_unmount() {
        let dir = TempDir::new().unwrap();
        let table = MountTable::new();
        table.mount("/a.tar", archive(&dir, "a.tar", &[("f", "data")])).await;
        let fh = table.open(Path::new("/a.tar/f"), OpenFlags::read()).await.unwrap();

        assert!(table.unmount("/a.tar").await);
        assert!(!table.unmount("/a.tar").await);
        assert!(read(&table, "/a.tar/f").await.is_err());
        assert!(matches!(table.read(fh, 0, 1).await, Err(VfsError::InvalidHandle(_))));
    }

    #[tokio::test]
    async fn test_no_mount_error() {
        let table = MountTable::new();
        let err = table.getattr(Path::new("/nothing/here.txt")).await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);

        let attr = table.getattr(Path::new("/")).await.unwrap();
        assert!(attr.is_dir());
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for name in ["one.tar", "two.tar"] {
            let mut image = ArchiveImage::new();
            image.add_file("", "name", name.as_bytes());
            paths.push(image.write_to(dir.path(), name).unwrap().0);
        }

        let config = MountConfig {
            sources: paths,
            ..Default::default()
        };
        let table = MountTable::from_config(&config).await.unwrap();
        let mounts = table.list_mounts().await;
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().all(|m| m.read_only));

        assert_eq!(read(&table, "/two.tar/name").await.unwrap(), b"two.tar");
        table.close().await;
        assert!(table.list_mounts().await.is_empty());
    }
}
