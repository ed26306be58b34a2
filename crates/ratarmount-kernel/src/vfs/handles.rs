//! Open file handles.

use dashmap::DashMap;
use ratarmount_index::SparseExtent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::archive::ResolvedNode;
use super::blocking;
use super::content;
use super::error::{VfsError, VfsResult};
use super::types::FileHandle;

/// Per-open state. Never shared between opens.
#[derive(Debug)]
pub struct OpenFileHandle {
    node: ResolvedNode,
    extents: Arc<[SparseExtent]>,
}

impl OpenFileHandle {
    /// Wrap a resolved node, loading its sparse map if it has one.
    pub async fn open(node: ResolvedNode) -> VfsResult<Self> {
        let extents: Arc<[SparseExtent]> = match &node.record {
            Some(record) if record.is_sparse => {
                let index = Arc::clone(node.mount.index());
                let offset_header = record.offset_header;
                blocking::run(move || Ok(index.sparse_extents(offset_header)?))
                    .await?
                    .into()
            }
            _ => Arc::from(Vec::new()),
        };
        Ok(Self { node, extents })
    }

    pub fn node(&self) -> &ResolvedNode {
        &self.node
    }

    /// Read up to `size` bytes at `offset`.
    pub async fn read(&self, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        if self.node.is_dir() {
            return Err(VfsError::is_a_directory(self.node.path.clone()));
        }
        let Some(record) = self.node.record.clone() else {
            return Err(VfsError::is_a_directory(self.node.path.clone()));
        };

        let source = Arc::clone(self.node.mount.source());
        let extents = Arc::clone(&self.extents);
        blocking::run(move || {
            Ok(content::read_member(&source, &record, &extents, offset, size)?)
        })
        .await
    }
}

/// Handle allocation and lookup.
#[derive(Debug)]
pub struct HandleTable {
    next: AtomicU64,
    open: DashMap<u64, Arc<OpenFileHandle>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            // 0 is never handed out.
            next: AtomicU64::new(1),
            open: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: OpenFileHandle) -> FileHandle {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.open.insert(fh, Arc::new(handle));
        FileHandle(fh)
    }

    pub fn get(&self, fh: FileHandle) -> VfsResult<Arc<OpenFileHandle>> {
        self.open
            .get(&fh.0)
            .map(|h| Arc::clone(h.value()))
            .ok_or(VfsError::InvalidHandle(fh.0))
    }

    pub fn remove(&self, fh: FileHandle) -> VfsResult<()> {
        self.open
            .remove(&fh.0)
            .map(|_| ())
            .ok_or(VfsError::InvalidHandle(fh.0))
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn clear(&self) {
        self.open.clear();
    }
}
