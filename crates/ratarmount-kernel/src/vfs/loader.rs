//! Loading indexes for nested archives.

use ratarmount_index::{IndexResult, IndexStore, MemberRecord, PoolConfig, nested_index_path};

/// Supplies the index of an archive nested inside a mounted one.
///
/// Called at most once per nested member and session, on a blocking
/// thread.
pub trait IndexLoader: Send + Sync + 'static {
    fn load(&self, parent: &IndexStore, member: &MemberRecord) -> IndexResult<IndexStore>;
}

/// Looks for nested indexes next to the parent index, see
/// [`nested_index_path`].
#[derive(Debug, Clone, Default)]
pub struct SidecarIndexLoader {
    pool: PoolConfig,
}

impl SidecarIndexLoader {
    pub fn new(pool: PoolConfig) -> Self {
        Self { pool }
    }
}

impl IndexLoader for SidecarIndexLoader {
    fn load(&self, parent: &IndexStore, member: &MemberRecord) -> IndexResult<IndexStore> {
        let path = nested_index_path(parent.path(), member.offset_header);
        IndexStore::open(path, self.pool)
    }
}
