//! Row types of the persisted index.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// One member of an archive, as recorded by the index-builder.
///
/// `path` is the parent directory: `""` for members at the archive root,
/// otherwise an absolute path without trailing slash (`"/a/b"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub path: String,
    pub name: String,
    /// Archive offset of the member header. Increases with recency.
    pub offset_header: u64,
    /// Archive offset of the member data.
    pub offset: u64,
    /// Logical size exposed to clients (expanded size for sparse members).
    pub size: u64,
    pub mtime: i64,
    /// Full `st_mode`, including file type bits.
    pub mode: u32,
    /// Archive-format type flag.
    pub type_flag: i64,
    /// Symbolic link target, empty for anything but links.
    pub linkname: String,
    pub uid: u32,
    pub gid: u32,
    /// Data is itself an archive that can be mounted recursively.
    pub is_archive: bool,
    pub is_sparse: bool,
}

impl MemberRecord {
    /// Create a regular file record with default metadata.
    pub fn file(path: impl Into<String>, name: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            offset_header: offset.saturating_sub(512),
            offset,
            size,
            mtime: 0,
            mode: libc_mode::S_IFREG | 0o644,
            type_flag: 0,
            linkname: String::new(),
            uid: 0,
            gid: 0,
            is_archive: false,
            is_sparse: false,
        }
    }

    /// Create a directory record with default metadata.
    pub fn directory(path: impl Into<String>, name: impl Into<String>, offset_header: u64) -> Self {
        Self {
            mode: libc_mode::S_IFDIR | 0o755,
            offset_header,
            offset: offset_header + 512,
            type_flag: 5,
            ..Self::file(path, name, 0, 0)
        }
    }

    /// Set the header offset.
    pub fn with_offset_header(mut self, offset_header: u64) -> Self {
        self.offset_header = offset_header;
        self
    }

    /// Set the link target.
    pub fn with_linkname(mut self, linkname: impl Into<String>) -> Self {
        self.linkname = linkname.into();
        self
    }

    /// Mark as a nested archive.
    pub fn with_archive(mut self, is_archive: bool) -> Self {
        self.is_archive = is_archive;
        self
    }

    /// Mark as sparse.
    pub fn with_sparse(mut self, is_sparse: bool) -> Self {
        self.is_sparse = is_sparse;
        self
    }

    /// Set mtime, ownership and permission bits.
    pub fn with_meta(mut self, mtime: i64, perm: u32, uid: u32, gid: u32) -> Self {
        self.mtime = mtime;
        self.mode = (self.mode & libc_mode::S_IFMT) | (perm & 0o7777);
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Full path of this member (`/` + parent + name).
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path, self.name)
    }

    /// Returns true if this member is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        !self.linkname.is_empty()
    }

    /// Returns true if the mode says directory.
    pub fn is_dir(&self) -> bool {
        self.mode & libc_mode::S_IFMT == libc_mode::S_IFDIR
    }

    pub(crate) const COLUMNS: &'static str = r#""path", "name", "offsetheader", "offset", "size", "mtime", "mode", "type", "linkname", "uid", "gid", "istar", "issparse""#;

    /// Decode a row selected with [`Self::COLUMNS`].
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mtime: Option<f64> = row.get(5)?;
        Ok(Self {
            path: row.get(0)?,
            name: row.get(1)?,
            offset_header: unsigned(row, 2)?,
            offset: unsigned(row, 3)?,
            size: unsigned(row, 4)?,
            mtime: mtime.unwrap_or(0.0) as i64,
            mode: unsigned32(row, 6)?,
            type_flag: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
            linkname: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            uid: unsigned32(row, 9)?,
            gid: unsigned32(row, 10)?,
            is_archive: row.get::<_, Option<bool>>(11)?.unwrap_or(false),
            is_sparse: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
        })
    }
}

/// One stored data segment of a sparse member.
///
/// Logical ranges not covered by any extent are holes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseExtent {
    pub logical_offset: u64,
    /// Absolute offset of the segment inside the owning archive.
    pub physical_offset: u64,
    pub size: u64,
}

impl SparseExtent {
    pub fn new(logical_offset: u64, physical_offset: u64, size: u64) -> Self {
        Self {
            logical_offset,
            physical_offset,
            size,
        }
    }

    /// End of the logical range covered by this extent.
    pub fn logical_end(&self) -> u64 {
        self.logical_offset + self.size
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            logical_offset: unsigned(row, 0)?,
            physical_offset: unsigned(row, 1)?,
            size: unsigned(row, 2)?,
        })
    }
}

fn unsigned(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: Option<i64> = row.get(idx)?;
    let value = value.unwrap_or(0);
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn unsigned32(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: Option<i64> = row.get(idx)?;
    let value = value.unwrap_or(0);
    u32::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

/// File type bits, kept here so the index crate stays free of libc.
pub(crate) mod libc_mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path() {
        assert_eq!(MemberRecord::file("", "a.txt", 512, 1).full_path(), "/a.txt");
        assert_eq!(MemberRecord::file("/dir", "a.txt", 512, 1).full_path(), "/dir/a.txt");
    }

    #[test]
    fn test_with_meta_keeps_type_bits() {
        let record = MemberRecord::directory("", "d", 0).with_meta(7, 0o700, 1000, 100);
        assert!(record.is_dir());
        assert_eq!(record.mode & 0o7777, 0o700);
        assert_eq!(record.uid, 1000);
    }

    #[test]
    fn test_symlink_flag() {
        let record = MemberRecord::file("", "l", 0, 0).with_linkname("target");
        assert!(record.is_symlink());
        assert!(!MemberRecord::file("", "f", 0, 0).is_symlink());
    }
}
