//! Byte-addressable archive sources.
//!
//! All reads are positional, so concurrent readers at different offsets
//! never contend on a shared cursor.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An archive file, or a byte range of another source holding a nested
/// archive.
#[derive(Debug)]
pub enum MountSource {
    File {
        path: PathBuf,
        file: File,
        len: u64,
    },
    Slice {
        parent: Arc<MountSource>,
        start: u64,
        len: u64,
    },
}

impl MountSource {
    /// Open an archive file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::File {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// The range `[start, start + len)` of `parent`.
    pub fn slice(parent: &Arc<MountSource>, start: u64, len: u64) -> Self {
        Self::Slice {
            parent: Arc::clone(parent),
            start,
            len,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } | Self::Slice { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nesting depth: 0 for a file.
    pub fn depth(&self) -> usize {
        match self {
            Self::File { .. } => 0,
            Self::Slice { parent, .. } => parent.depth() + 1,
        }
    }

    /// Fill `buf` from `offset`. Fails with `UnexpectedEof` past the end.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "read offset overflow"))?;
        if end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read [{offset}, {end}) past end of {} ({} bytes)",
                    self,
                    self.len()
                ),
            ));
        }

        match self {
            Self::File { file, .. } => file.read_exact_at(buf, offset),
            Self::Slice { parent, start, .. } => parent.read_exact_at(buf, start + offset),
        }
    }
}

impl std::fmt::Display for MountSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File { path, .. } => write!(f, "{}", path.display()),
            Self::Slice { parent, start, len } => {
                write!(f, "{}[{}..{}]", parent, start, start + len)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(content: &[u8]) -> (tempfile::NamedTempFile, Arc<MountSource>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        let source = Arc::new(MountSource::open(file.path()).unwrap());
        (file, source)
    }

    #[test]
    fn test_positional_read() {
        let (_file, source) = source(b"0123456789");
        assert_eq!(source.len(), 10);

        let mut buf = [0u8; 3];
        source.read_exact_at(&mut buf, 4).unwrap();
        assert_eq!(&buf, b"456");
    }

    #[test]
    fn test_read_past_end() {
        let (_file, source) = source(b"0123456789");
        let mut buf = [0u8; 4];
        let err = source.read_exact_at(&mut buf, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_nested_slices() {
        let (_file, source) = source(b"....outer[inner(x)]....");
        let outer = Arc::new(MountSource::slice(&source, 9, 10));
        let inner = MountSource::slice(&outer, 6, 3);
        assert_eq!(inner.depth(), 2);

        let mut buf = [0u8; 3];
        inner.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"(x)");

        // Bounded by the slice, not the file.
        let mut buf = [0u8; 4];
        assert!(inner.read_exact_at(&mut buf, 0).is_err());
    }

    #[test]
    fn test_open_missing() {
        assert!(MountSource::open("/definitely/not/here.tar").is_err());
    }
}
