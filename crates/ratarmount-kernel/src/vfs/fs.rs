//! Archive filesystem backend.
//!
//! Serves one archive (and, recursively, the archives inside it) from its
//! member index. Besides the members themselves it exposes a virtual
//! `<member>.versions/` directory per member, listing every stored version
//! by 1-based number.

use async_trait::async_trait;
use ratarmount_index::{IndexStore, PoolConfig, locate_index};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::archive::{ArchiveMount, Located, ResolvedNode};
use super::error::{VfsError, VfsResult};
use super::handles::{HandleTable, OpenFileHandle};
use super::loader::{IndexLoader, SidecarIndexLoader};
use super::ops::VfsOps;
use super::path::{self, VersionsPath};
use super::source::MountSource;
use super::types::{DirEntry, FileAttr, FileHandle, FileType, OpenFlags, StatFs};
use super::version::VersionSelector;

/// Read-only filesystem over one indexed archive.
#[derive(Debug)]
pub struct ArchiveFs {
    archive: PathBuf,
    root: Arc<ArchiveMount>,
    handles: HandleTable,
}

/// Builder for [`ArchiveFs`].
pub struct ArchiveFsBuilder {
    archive: PathBuf,
    index: Option<PathBuf>,
    recursive: bool,
    pool: PoolConfig,
    loader: Option<Arc<dyn IndexLoader>>,
}

impl ArchiveFsBuilder {
    /// Use this index file instead of searching for one.
    pub fn index(mut self, path: impl Into<PathBuf>) -> Self {
        self.index = Some(path.into());
        self
    }

    /// Expose nested archives as directories. On by default.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the default [`SidecarIndexLoader`].
    pub fn loader(mut self, loader: impl IndexLoader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Open the archive and its index.
    ///
    /// Fails with `IndexUnavailable` or `CorruptIndex` when the index cannot
    /// be used; mounting must not proceed in that case.
    pub fn build(self) -> VfsResult<ArchiveFs> {
        let index_path = match self.index {
            Some(path) => path,
            None => locate_index(&self.archive).ok_or_else(|| {
                VfsError::IndexUnavailable(format!(
                    "no index found for {}",
                    self.archive.display()
                ))
            })?,
        };

        let index = IndexStore::open(&index_path, self.pool)?;
        let source = MountSource::open(&self.archive).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("cannot open archive {}: {e}", self.archive.display()),
            )
        })?;
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(SidecarIndexLoader::new(self.pool)));

        tracing::info!(
            archive = %self.archive.display(),
            index = %index_path.display(),
            size = source.len(),
            recursive = self.recursive,
            "opened archive"
        );

        Ok(ArchiveFs {
            archive: self.archive,
            root: Arc::new(ArchiveMount::new(
                Arc::new(source),
                Arc::new(index),
                loader,
                self.recursive,
            )),
            handles: HandleTable::new(),
        })
    }
}

/// What a request path names.
enum Lookup {
    Node(ResolvedNode),
    /// A `<member>.versions` directory.
    VersionsDir(Located),
}

impl ArchiveFs {
    pub fn builder(archive: impl Into<PathBuf>) -> ArchiveFsBuilder {
        ArchiveFsBuilder {
            archive: archive.into(),
            index: None,
            recursive: true,
            pool: PoolConfig::default(),
            loader: None,
        }
    }

    /// Open `archive` with the index found next to it and default settings.
    pub fn open(archive: impl Into<PathBuf>) -> VfsResult<Self> {
        Self::builder(archive).build()
    }

    /// The archive file being served.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn root(&self) -> &Arc<ArchiveMount> {
        &self.root
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Index queries issued so far, nested archives included.
    pub fn query_count(&self) -> u64 {
        self.root.query_count()
    }

    async fn lookup(&self, path: &str, version: VersionSelector) -> VfsResult<Lookup> {
        let missing = match self.root.resolve(path, version).await {
            Ok(node) => return Ok(Lookup::Node(node)),
            Err(VfsError::NotFound(missing)) => missing,
            Err(e) => return Err(e),
        };

        // Real members shadow version directories of the same name.
        match VersionsPath::parse(path::normalize(path)?) {
            Some(VersionsPath::Dir { base }) => {
                let located = self.root.locate(base).await?;
                if located.versions.is_empty() {
                    return Err(VfsError::NotFound(missing));
                }
                Ok(Lookup::VersionsDir(located))
            }
            Some(VersionsPath::Entry {
                base,
                version: n,
                rest,
            }) => {
                let node = self
                    .root
                    .resolve(base, VersionSelector::NthFromOldest(n))
                    .await?;
                let Some(record) = &node.record else {
                    return Err(VfsError::NotFound(missing));
                };
                if rest.is_empty() {
                    return Ok(Lookup::Node(node));
                }

                // Below a version entry, paths resolve inside that version.
                let inner = if node.mount.mounts_recursively(record) {
                    let nested = node.mount.nested(record).await?;
                    nested.resolve(rest, version).await?
                } else if record.is_dir() && !record.is_symlink() {
                    let path = format!("{}{rest}", node.path);
                    node.mount.resolve(&path, version).await?
                } else {
                    return Err(VfsError::NotFound(missing));
                };
                Ok(Lookup::Node(inner))
            }
            None => Err(VfsError::NotFound(missing)),
        }
    }

    async fn list_node(&self, node: &ResolvedNode) -> VfsResult<Vec<DirEntry>> {
        match &node.record {
            None => node.mount.list(&node.path).await,
            Some(record) if node.mount.mounts_recursively(record) => {
                let nested = node.mount.nested(record).await?;
                nested.list("/").await
            }
            Some(record) if record.is_dir() && !record.is_symlink() => {
                node.mount.list(&node.path).await
            }
            Some(_) => Err(VfsError::not_a_directory(node.path.clone())),
        }
    }
}

fn list_versions(located: &Located) -> Vec<DirEntry> {
    let mut entries = DirEntry::dots();
    entries.extend(located.versions.iter().enumerate().map(|(i, record)| {
        let kind = if located.mount.mounts_recursively(record) {
            FileType::Directory
        } else {
            FileAttr::from_record(record).kind
        };
        DirEntry::new((i + 1).to_string(), kind)
    }));
    entries
}

#[async_trait]
impl VfsOps for ArchiveFs {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let path = path::as_str(path)?;
        let attr = match self.lookup(path, VersionSelector::MostRecent).await? {
            Lookup::Node(node) => node.attr(),
            Lookup::VersionsDir(_) => FileAttr::directory(0o755),
        };
        tracing::trace!(path, mode = format_args!("{:o}", attr.mode), size = attr.size, "getattr");
        Ok(attr)
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let path = path::as_str(path)?;
        let entries = match self.lookup(path, VersionSelector::MostRecent).await? {
            Lookup::Node(node) => self.list_node(&node).await?,
            Lookup::VersionsDir(located) => list_versions(&located),
        };
        tracing::debug!(path, entries = entries.len(), "readdir");
        Ok(entries)
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let path = path::as_str(path)?;
        match self.lookup(path, VersionSelector::MostRecent).await? {
            Lookup::Node(ResolvedNode {
                record: Some(record),
                ..
            }) if record.is_symlink() => Ok(PathBuf::from(record.linkname)),
            _ => Err(VfsError::NotASymlink(path.to_string())),
        }
    }

    async fn versions(&self, path: &Path) -> VfsResult<Vec<FileAttr>> {
        let path = path::as_str(path)?;
        let located = self.root.locate(path).await?;
        if located.versions.is_empty() {
            return Ok(vec![FileAttr::directory(0o755)]);
        }
        Ok(located.versions.iter().map(FileAttr::from_record).collect())
    }

    async fn open_version(
        &self,
        path: &Path,
        flags: OpenFlags,
        version: VersionSelector,
    ) -> VfsResult<FileHandle> {
        let path = path::as_str(path)?;
        if !flags.is_read_only() {
            tracing::debug!(path, flags = flags.0, "refusing non-read-only open");
            return Err(VfsError::permission_denied(path));
        }

        let node = match self.lookup(path, version).await? {
            Lookup::Node(node) => node,
            Lookup::VersionsDir(located) => ResolvedNode {
                mount: located.mount,
                path: located.path,
                record: None,
            },
        };
        let fh = self.handles.insert(OpenFileHandle::open(node).await?);
        tracing::debug!(path, %version, fh = fh.0, "open");
        Ok(fh)
    }

    async fn read(&self, fh: FileHandle, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let handle = self.handles.get(fh)?;
        let data = handle.read(offset, size).await?;
        tracing::trace!(fh = fh.0, offset, size, read = data.len(), "read");
        Ok(data)
    }

    async fn release(&self, fh: FileHandle) -> VfsResult<()> {
        self.handles.remove(fh)?;
        tracing::trace!(fh = fh.0, "release");
        Ok(())
    }

    async fn statfs(&self) -> VfsResult<StatFs> {
        Ok(StatFs::default())
    }

    async fn close(&self) {
        let queries = self.root.query_count();
        let nested = self.root.nested_count();
        self.handles.clear();
        self.root.close();
        tracing::info!(
            archive = %self.archive.display(),
            queries,
            nested,
            "closed archive"
        );
    }
}
