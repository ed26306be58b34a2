//! Synthetic archives with matching indexes, for tests.
//!
//! Members are laid out tar-style: a 512-byte header block followed by the
//! data padded to a block boundary. The header bytes are zero; only the
//! offsets matter to the engine.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::IndexResult;
use crate::locate::nested_index_path;
use crate::record::{MemberRecord, SparseExtent};
use crate::writer::IndexWriter;

const BLOCK: usize = 512;

/// An archive image under construction.
#[derive(Debug, Clone, Default)]
pub struct ArchiveImage {
    data: Vec<u8>,
    records: Vec<MemberRecord>,
    extents: Vec<(u64, SparseExtent)>,
    nested: Vec<(u64, ArchiveImage)>,
}

impl ArchiveImage {
    pub fn new() -> Self {
        Self::default()
    }

    fn header_block(&mut self) -> u64 {
        let header = self.data.len() as u64;
        self.data.extend_from_slice(&[0u8; BLOCK]);
        header
    }

    fn append_data(&mut self, content: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(content);
        let padding = (BLOCK - self.data.len() % BLOCK) % BLOCK;
        self.data.resize(self.data.len() + padding, 0);
        offset
    }

    /// Append a regular file. Adding the same path again adds a version.
    pub fn add_file(&mut self, parent: &str, name: &str, content: &[u8]) -> MemberRecord {
        let header = self.header_block();
        let offset = self.append_data(content);
        let record = MemberRecord::file(parent, name, offset, content.len() as u64)
            .with_offset_header(header);
        self.records.push(record.clone());
        record
    }

    /// Append a directory.
    pub fn add_dir(&mut self, parent: &str, name: &str) -> MemberRecord {
        let header = self.header_block();
        let record = MemberRecord::directory(parent, name, header);
        self.records.push(record.clone());
        record
    }

    /// Append a symbolic link.
    pub fn add_symlink(&mut self, parent: &str, name: &str, target: &str) -> MemberRecord {
        let header = self.header_block();
        let mut record = MemberRecord::file(parent, name, header + BLOCK as u64, 0)
            .with_offset_header(header)
            .with_linkname(target);
        record.type_flag = 2;
        self.records.push(record.clone());
        record
    }

    /// Append a sparse file of logical length `size`.
    ///
    /// `segments` are `(logical offset, bytes)`; they are stored back to
    /// back and everything else is a hole.
    pub fn add_sparse(
        &mut self,
        parent: &str,
        name: &str,
        size: u64,
        segments: &[(u64, &[u8])],
    ) -> MemberRecord {
        let header = self.header_block();
        let offset = self.data.len() as u64;
        let mut physical = offset;
        for (logical, bytes) in segments {
            self.extents
                .push((header, SparseExtent::new(*logical, physical, bytes.len() as u64)));
            self.data.extend_from_slice(bytes);
            physical += bytes.len() as u64;
        }
        self.append_data(&[]);

        let record = MemberRecord::file(parent, name, offset, size)
            .with_offset_header(header)
            .with_sparse(true);
        self.records.push(record.clone());
        record
    }

    /// Append `inner` as a nested archive member with its own index.
    pub fn add_archive(&mut self, parent: &str, name: &str, inner: ArchiveImage) -> MemberRecord {
        let header = self.header_block();
        let offset = self.append_data(&inner.data);
        let record = MemberRecord::file(parent, name, offset, inner.data.len() as u64)
            .with_offset_header(header)
            .with_archive(true);
        self.records.push(record.clone());
        self.nested.push((header, inner));
        record
    }

    /// Write `<dir>/<name>` and its index `<dir>/<name>.index.sqlite`.
    ///
    /// Returns `(archive path, index path)`.
    pub fn write_to(&self, dir: &Path, name: &str) -> IndexResult<(PathBuf, PathBuf)> {
        let archive = dir.join(name);
        fs::write(&archive, &self.data)?;
        let index = dir.join(format!("{name}.index.sqlite"));
        self.write_index(&index)?;
        Ok((archive, index))
    }

    fn write_index(&self, path: &Path) -> IndexResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = IndexWriter::create(path)?;
        writer.insert_all(&self.records)?;
        for (header, extent) in &self.extents {
            writer.insert_extent(*header, extent)?;
        }
        for (header, inner) in &self.nested {
            inner.write_index(&nested_index_path(path, *header))?;
        }
        Ok(())
    }
}
