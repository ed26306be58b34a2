//! One mounted archive: its byte source, its index and the archives nested
//! inside it.
//!
//! Nested archives are mounted on first access and kept for the session.
//! Concurrent first accesses to the same member share a single build.

use dashmap::DashMap;
use ratarmount_index::{IndexStore, MemberRecord};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::blocking;
use super::error::{VfsError, VfsResult};
use super::loader::IndexLoader;
use super::path;
use super::source::MountSource;
use super::types::{DirEntry, FileAttr, FileType};
use super::version::VersionSelector;

/// Cache key of a nested mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NestedKey {
    path: String,
    name: String,
    offset_header: u64,
}

impl From<&MemberRecord> for NestedKey {
    fn from(record: &MemberRecord) -> Self {
        Self {
            path: record.path.clone(),
            name: record.name.clone(),
            offset_header: record.offset_header,
        }
    }
}

type NestedCell = Arc<OnceCell<Arc<ArchiveMount>>>;

/// A mounted archive.
pub struct ArchiveMount {
    source: Arc<MountSource>,
    index: Arc<IndexStore>,
    loader: Arc<dyn IndexLoader>,
    recursive: bool,
    nested: DashMap<NestedKey, NestedCell>,
}

impl std::fmt::Debug for ArchiveMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveMount")
            .field("source", &self.source.to_string())
            .field("index", &self.index.path())
            .field("recursive", &self.recursive)
            .field("nested", &self.nested.len())
            .finish()
    }
}

/// All records found for a path, and the mount they live in.
///
/// `versions` is empty for the mount root and for directories that only
/// exist implicitly as the parent of other members.
#[derive(Debug, Clone)]
pub struct Located {
    pub mount: Arc<ArchiveMount>,
    pub path: String,
    pub versions: Vec<MemberRecord>,
}

/// Outcome of looking `path` up in one mount's index.
enum Step {
    Found(Vec<MemberRecord>),
    Implicit,
    /// Continue inside the nested archive `record` at the remaining path.
    Descend(MemberRecord, String),
}

/// A path resolved to a single record.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub mount: Arc<ArchiveMount>,
    /// Path inside `mount`.
    pub path: String,
    /// `None` for synthetic directories.
    pub record: Option<MemberRecord>,
}

impl ResolvedNode {
    /// Attributes as exposed to clients.
    pub fn attr(&self) -> FileAttr {
        match &self.record {
            None => FileAttr::directory(0o755),
            Some(record) if self.mount.mounts_recursively(record) => {
                FileAttr::mounted_archive(record)
            }
            Some(record) => FileAttr::from_record(record),
        }
    }

    /// Whether reading this node means listing a directory.
    pub fn is_dir(&self) -> bool {
        self.attr().is_dir()
    }
}

impl ArchiveMount {
    pub fn new(
        source: Arc<MountSource>,
        index: Arc<IndexStore>,
        loader: Arc<dyn IndexLoader>,
        recursive: bool,
    ) -> Self {
        Self {
            source,
            index,
            loader,
            recursive,
            nested: DashMap::new(),
        }
    }

    pub fn source(&self) -> &Arc<MountSource> {
        &self.source
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    /// Whether `record` is exposed as a directory holding a nested archive.
    ///
    /// Sparse members are always plain files.
    pub fn mounts_recursively(&self, record: &MemberRecord) -> bool {
        self.recursive && record.is_archive && !record.is_sparse
    }

    /// Find every record stored for `path`, descending into nested
    /// archives as needed.
    pub async fn locate(self: &Arc<Self>, path: &str) -> VfsResult<Located> {
        let mut mount = Arc::clone(self);
        let mut path = path::normalize(path)?.to_string();

        loop {
            if path == "/" {
                return Ok(Located {
                    mount,
                    path,
                    versions: Vec::new(),
                });
            }

            let step = {
                let mount = Arc::clone(&mount);
                let path = path.clone();
                blocking::run(move || mount.step(&path)).await?
            };
            match step {
                Step::Found(versions) => {
                    return Ok(Located {
                        mount,
                        path,
                        versions,
                    });
                }
                Step::Implicit => {
                    return Ok(Located {
                        mount,
                        path,
                        versions: Vec::new(),
                    });
                }
                Step::Descend(record, rest) => {
                    let nested = mount.nested(&record).await?;
                    mount = nested;
                    path = rest;
                }
            }
        }
    }

    /// One index round for `path`. Blocking.
    fn step(&self, path: &str) -> VfsResult<Step> {
        let (parent, name) = path::split(path)?;
        let versions = self.index.lookup(parent, name)?;
        if !versions.is_empty() {
            return Ok(Step::Found(versions));
        }

        if !self.index.list_children(path)?.is_empty() {
            tracing::trace!(path, "implicit directory");
            return Ok(Step::Implicit);
        }

        if !self.recursive {
            return Err(VfsError::not_found(path));
        }
        match self.archive_ancestor(path)? {
            Some((record, rest)) => Ok(Step::Descend(record, rest)),
            None => Err(VfsError::not_found(path)),
        }
    }

    /// Resolve `path` to one record using `selector`.
    pub async fn resolve(
        self: &Arc<Self>,
        path: &str,
        selector: VersionSelector,
    ) -> VfsResult<ResolvedNode> {
        let located = self.locate(path).await?;
        if located.versions.is_empty() {
            // Synthetic directories have exactly one version.
            if selector != VersionSelector::MostRecent
                && selector != VersionSelector::NthFromOldest(1)
            {
                return Err(VfsError::not_found(located.path));
            }
            return Ok(ResolvedNode {
                mount: located.mount,
                path: located.path,
                record: None,
            });
        }

        let Located {
            mount,
            path,
            versions,
        } = located;
        match selector.select(versions) {
            Some(record) => Ok(ResolvedNode {
                mount,
                path,
                record: Some(record),
            }),
            None => {
                tracing::debug!(path = %path, version = %selector, "version out of range");
                Err(VfsError::not_found(path))
            }
        }
    }

    /// The closest ancestor of `path` that has a record, if it is a
    /// mountable archive. Returns the record and the path remaining inside
    /// it.
    fn archive_ancestor(&self, path: &str) -> VfsResult<Option<(MemberRecord, String)>> {
        let mut end = path.len();
        while let Some(slash) = path[..end].rfind('/') {
            if slash == 0 {
                break;
            }
            let ancestor = &path[..slash];
            let (parent, name) = path::split(ancestor)?;
            let found = VersionSelector::MostRecent.select(self.index.lookup(parent, name)?);
            if let Some(record) = found {
                if self.mounts_recursively(&record) {
                    return Ok(Some((record, path[slash..].to_string())));
                }
                return Ok(None);
            }
            end = slash;
        }
        Ok(None)
    }

    /// The nested mount for an archive member, building it on first use.
    pub async fn nested(self: &Arc<Self>, record: &MemberRecord) -> VfsResult<Arc<ArchiveMount>> {
        let cell = Arc::clone(self.nested.entry(NestedKey::from(record)).or_default().value());
        let mount = cell
            .get_or_try_init(|| self.build_nested(record.clone()))
            .await?;
        Ok(Arc::clone(mount))
    }

    async fn build_nested(self: &Arc<Self>, record: MemberRecord) -> VfsResult<Arc<ArchiveMount>> {
        let end = record.offset.checked_add(record.size);
        if end.is_none_or(|end| end > self.source.len()) {
            return Err(VfsError::io(format!(
                "nested archive {} exceeds {}",
                record.full_path(),
                self.source
            )));
        }

        let parent = Arc::clone(self);
        let member = record.full_path();
        let result = blocking::run(move || {
            let index = parent.loader.load(&parent.index, &record)?;
            let source = MountSource::slice(&parent.source, record.offset, record.size);
            Ok(ArchiveMount::new(
                Arc::new(source),
                Arc::new(index),
                Arc::clone(&parent.loader),
                parent.recursive,
            ))
        })
        .await;

        match result {
            Ok(mount) => {
                tracing::info!(
                    member = %member,
                    source = %mount.source,
                    depth = mount.source.depth(),
                    "mounted nested archive"
                );
                Ok(Arc::new(mount))
            }
            Err(e) => {
                tracing::warn!(member = %member, error = %e, "failed to mount nested archive");
                Err(e)
            }
        }
    }

    /// Entries of directory `dir`, with `.` and `..`.
    pub async fn list(self: &Arc<Self>, dir: &str) -> VfsResult<Vec<DirEntry>> {
        let mount = Arc::clone(self);
        let key = path::dir_key(dir).to_string();
        let records = blocking::run(move || Ok(mount.index.latest_children(&key)?)).await?;

        let mut entries = DirEntry::dots();
        for record in records {
            let kind = if self.mounts_recursively(&record) {
                FileType::Directory
            } else {
                FileAttr::from_record(&record).kind
            };
            entries.push(DirEntry::new(record.name, kind));
        }
        Ok(entries)
    }

    /// Number of nested archives mounted so far.
    pub fn nested_count(&self) -> usize {
        self.nested.iter().filter(|cell| cell.value().initialized()).count()
    }

    /// Index queries issued by this mount and every nested one.
    pub fn query_count(&self) -> u64 {
        self.index.query_count()
            + self
                .nested
                .iter()
                .filter_map(|cell| cell.value().get().map(|m| m.query_count()))
                .sum::<u64>()
    }

    /// Drop nested mounts and release pooled index connections.
    pub fn close(&self) {
        for cell in self.nested.iter() {
            if let Some(mount) = cell.value().get() {
                mount.close();
            }
        }
        self.nested.clear();
        self.index.close();
    }
}
