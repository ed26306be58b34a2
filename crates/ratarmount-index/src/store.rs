//! Query façade over one index file.

use rusqlite::params;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{IndexError, IndexResult};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::record::{MemberRecord, SparseExtent};
use crate::schema;

/// Read-only view of a member index.
///
/// Safe to share between threads; every query runs on its own pooled
/// connection.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    pool: ConnectionPool,
    has_extents: bool,
    queries: AtomicU64,
}

impl IndexStore {
    /// Open and validate the index at `path`.
    ///
    /// Fails with [`IndexError::Unavailable`] if the file cannot be opened
    /// and [`IndexError::Corrupt`] if it lacks the `files` layout.
    pub fn open(path: impl AsRef<Path>, config: PoolConfig) -> IndexResult<Self> {
        let path = path.as_ref();
        let conn = ConnectionPool::connect(path).map_err(|e| IndexError::Unavailable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let has_extents = schema::validate(&conn, path)?;
        tracing::debug!(path = %path.display(), has_extents, "opened index");

        Ok(Self {
            path: path.to_path_buf(),
            pool: ConnectionPool::with_connection(path, conn, config),
            has_extents,
            queries: AtomicU64::new(0),
        })
    }

    /// Path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All versions of `parent_path/name`, oldest first.
    pub fn lookup(&self, parent_path: &str, name: &str) -> IndexResult<Vec<MemberRecord>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT {} FROM "files" WHERE "path" == ?1 AND "name" == ?2 ORDER BY "offsetheader" ASC"#,
            MemberRecord::COLUMNS
        ))?;
        let rows = stmt.query_map(params![parent_path, name], MemberRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distinct child names of `parent_path`, sorted.
    ///
    /// Names appear once no matter how many versions they have.
    pub fn list_children(&self, parent_path: &str) -> IndexResult<Vec<String>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT DISTINCT "name" FROM "files"
               WHERE "path" == ?1 AND "name" IS NOT NULL AND "name" != ''
               ORDER BY "name""#,
        )?;
        let rows = stmt.query_map(params![parent_path], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The most recent record of every child of `parent_path`, sorted by
    /// name. Used for directory listings that need entry types.
    pub fn latest_children(&self, parent_path: &str) -> IndexResult<Vec<MemberRecord>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let conn = self.pool.get()?;
        // SQLite takes bare columns from the row that holds the MAX().
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT {}, MAX("offsetheader") FROM "files"
               WHERE "path" == ?1 AND "name" IS NOT NULL AND "name" != ''
               GROUP BY "name" ORDER BY "name""#,
            MemberRecord::COLUMNS
        ))?;
        let rows = stmt.query_map(params![parent_path], MemberRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Data segments of the sparse member whose header is at `offset_header`.
    ///
    /// Empty when the index carries no extent table.
    pub fn sparse_extents(&self, offset_header: u64) -> IndexResult<Vec<SparseExtent>> {
        if !self.has_extents {
            return Ok(Vec::new());
        }
        self.queries.fetch_add(1, Ordering::Relaxed);
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            r#"SELECT "logicaloffset", "physicaloffset", "size" FROM "sparse_extents"
               WHERE "offsetheader" == ?1 ORDER BY "logicaloffset""#,
        )?;
        let rows = stmt.query_map(params![offset_header as i64], SparseExtent::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Number of pooled connections currently idle.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    /// Release pooled connections. The store stays usable.
    pub fn close(&self) {
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::IndexWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build(records: &[MemberRecord]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.tar.index.sqlite");
        let writer = IndexWriter::create(&path).unwrap();
        for record in records {
            writer.insert(record).unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_lookup_orders_versions() {
        let (_dir, path) = build(&[
            MemberRecord::file("", "log", 562, 3).with_offset_header(50),
            MemberRecord::file("", "log", 522, 3).with_offset_header(10),
            MemberRecord::file("", "other", 1024, 3),
        ]);
        let store = IndexStore::open(&path, PoolConfig::default()).unwrap();

        let versions = store.lookup("", "log").unwrap();
        let headers: Vec<u64> = versions.iter().map(|r| r.offset_header).collect();
        assert_eq!(headers, vec![10, 50]);

        assert!(store.lookup("", "missing").unwrap().is_empty());
        assert!(store.lookup("/nope", "log").unwrap().is_empty());
    }

    #[test]
    fn test_list_children_distinct() {
        let mut records = vec![MemberRecord::directory("", "dir", 0)];
        for i in 0..5 {
            records.push(MemberRecord::file("/dir", "a", 1024 + i * 1024, 1).with_offset_header(512 + i * 1024));
        }
        records.push(MemberRecord::file("/dir", "b", 9000, 1));
        let (_dir, path) = build(&records);
        let store = IndexStore::open(&path, PoolConfig::default()).unwrap();

        assert_eq!(store.list_children("/dir").unwrap(), vec!["a", "b"]);
        assert_eq!(store.list_children("").unwrap(), vec!["dir"]);
        assert!(store.list_children("/dir/a").unwrap().is_empty());
    }

    #[test]
    fn test_latest_children() {
        let (_dir, path) = build(&[
            MemberRecord::file("", "log", 1024, 3).with_offset_header(512),
            MemberRecord::file("", "log", 2048, 7).with_offset_header(1536),
            MemberRecord::directory("", "etc", 3072),
        ]);
        let store = IndexStore::open(&path, PoolConfig::default()).unwrap();

        let latest = store.latest_children("").unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].name, "etc");
        assert!(latest[0].is_dir());
        assert_eq!(latest[1].name, "log");
        assert_eq!(latest[1].size, 7);
    }

    #[test]
    fn test_sparse_extents() {
        let (_dir, path) = build(&[MemberRecord::file("", "sparse", 1024, 100).with_sparse(true)]);
        let writer = IndexWriter::open(&path).unwrap();
        writer.insert_extent(512, &SparseExtent::new(60, 1034, 10)).unwrap();
        writer.insert_extent(512, &SparseExtent::new(10, 1024, 10)).unwrap();
        drop(writer);

        let store = IndexStore::open(&path, PoolConfig::default()).unwrap();
        let extents = store.sparse_extents(512).unwrap();
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].logical_offset, 10);
        assert_eq!(extents[1].logical_offset, 60);
        assert!(store.sparse_extents(4096).unwrap().is_empty());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = IndexStore::open(dir.path().join("absent.sqlite"), PoolConfig::default());
        assert!(matches!(result, Err(IndexError::Unavailable { .. })));
    }

    #[test]
    fn test_open_without_files_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.sqlite");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE unrelated (x INTEGER);").unwrap();
        drop(conn);

        let result = IndexStore::open(&path, PoolConfig::default());
        assert!(matches!(result, Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn test_open_with_missing_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.sqlite");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(r#"CREATE TABLE "files" ("path" TEXT, "name" TEXT);"#)
            .unwrap();
        drop(conn);

        let err = IndexStore::open(&path, PoolConfig::default()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("offsetheader"));
    }

    #[test]
    fn test_concurrent_lookups_use_separate_connections() {
        let records: Vec<_> = (0..50)
            .map(|i| MemberRecord::file("", format!("f{i}"), 512 + i * 1024, 1))
            .collect();
        let (_dir, path) = build(&records);
        let store = Arc::new(IndexStore::open(&path, PoolConfig { max_idle: 4 }).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let found = store.lookup("", &format!("f{}", (i + t) % 50)).unwrap();
                        assert_eq!(found.len(), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.query_count(), 400);
        assert!(store.idle_connections() <= 4);
    }
}
