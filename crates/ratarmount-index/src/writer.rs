//! Index file creation.
//!
//! The engine never writes indexes. This exists for test fixtures and for
//! tooling that converts other index formats.

use rusqlite::{params, Connection};
use std::path::Path;

use crate::error::IndexResult;
use crate::record::{MemberRecord, SparseExtent};
use crate::schema::SCHEMA;

/// Writes records into an index file.
pub struct IndexWriter {
    conn: Connection,
}

impl IndexWriter {
    /// Create (or extend) the index at `path`, applying the schema.
    pub fn create(path: impl AsRef<Path>) -> IndexResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an existing index for appending.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        Self::create(path)
    }

    /// Insert one member record.
    pub fn insert(&self, record: &MemberRecord) -> IndexResult<()> {
        insert_record(&self.conn, record)
    }

    /// Insert every record in one transaction.
    pub fn insert_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a MemberRecord>,
    ) -> IndexResult<()> {
        let tx = self.conn.transaction()?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert one data segment for the sparse member at `offset_header`.
    pub fn insert_extent(&self, offset_header: u64, extent: &SparseExtent) -> IndexResult<()> {
        self.conn.execute(
            r#"INSERT INTO "sparse_extents" ("offsetheader", "logicaloffset", "physicaloffset", "size")
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                offset_header as i64,
                extent.logical_offset as i64,
                extent.physical_offset as i64,
                extent.size as i64,
            ],
        )?;
        Ok(())
    }
}

fn insert_record(conn: &Connection, record: &MemberRecord) -> IndexResult<()> {
    conn.execute(
        r#"INSERT INTO "files"
           ("path", "name", "offsetheader", "offset", "size", "mtime", "mode", "type",
            "linkname", "uid", "gid", "istar", "issparse")
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
        params![
            record.path,
            record.name,
            record.offset_header as i64,
            record.offset as i64,
            record.size as i64,
            record.mtime,
            record.mode,
            record.type_flag,
            record.linkname,
            record.uid,
            record.gid,
            record.is_archive,
            record.is_sparse,
        ],
    )?;
    Ok(())
}
