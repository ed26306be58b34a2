//! Persisted index layout.
//!
//! This is the contract with the index-builder; column names must match.

use rusqlite::Connection;
use std::path::Path;

use crate::error::{IndexError, IndexResult};

/// Columns every `files` table must have.
pub const FILES_COLUMNS: [&str; 13] = [
    "path",
    "name",
    "offsetheader",
    "offset",
    "size",
    "mtime",
    "mode",
    "type",
    "linkname",
    "uid",
    "gid",
    "istar",
    "issparse",
];

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "files" (
    "path"          VARCHAR(65535) NOT NULL,  -- with leading and without trailing slash
    "name"          VARCHAR(65535) NOT NULL,
    "offsetheader"  INTEGER,
    "offset"        INTEGER,
    "size"          INTEGER,
    "mtime"         INTEGER,
    "mode"          INTEGER,
    "type"          INTEGER,
    "linkname"      VARCHAR(65535),
    "uid"           INTEGER,
    "gid"           INTEGER,
    "istar"         BOOL,
    "issparse"      BOOL,  -- size is the expanded size
    PRIMARY KEY (path, name, offsetheader)
);

-- Data segments of sparse members. Uncovered ranges are holes.
CREATE TABLE IF NOT EXISTS "sparse_extents" (
    "offsetheader"   INTEGER NOT NULL,
    "logicaloffset"  INTEGER NOT NULL,
    "physicaloffset" INTEGER NOT NULL,
    "size"           INTEGER NOT NULL,
    PRIMARY KEY (offsetheader, logicaloffset)
);
"#;

/// Column names of `table`, empty if the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect()
}

/// Check that the `files` table has the expected layout.
///
/// Returns whether the optional `sparse_extents` table is present.
pub(crate) fn validate(conn: &Connection, path: &Path) -> IndexResult<bool> {
    let columns = table_columns(conn, "files").map_err(|e| IndexError::Unavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    if columns.is_empty() {
        return Err(IndexError::corrupt(path, "missing table \"files\""));
    }

    let missing: Vec<&str> = FILES_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|have| have.eq_ignore_ascii_case(c)))
        .collect();
    if !missing.is_empty() {
        return Err(IndexError::corrupt(
            path,
            format!("table \"files\" lacks columns: {}", missing.join(", ")),
        ));
    }

    let extents = table_columns(conn, "sparse_extents")?;
    Ok(!extents.is_empty())
}
