//! Member content reads.
//!
//! Requests are clamped to the member's logical size, so reading past the
//! end yields short or empty buffers rather than errors.

use ratarmount_index::{MemberRecord, SparseExtent};
use std::io;

use super::source::MountSource;

/// Clamp `[offset, offset + len)` to a member of `size` bytes.
///
/// Returns `None` when nothing is left to read.
pub fn clamp(size: u64, offset: u64, len: u32) -> Option<(u64, usize)> {
    if offset >= size || len == 0 {
        return None;
    }
    let available = size - offset;
    let len = available.min(u64::from(len));
    Some((offset, len as usize))
}

/// Read part of a member. Blocking.
///
/// `extents` must be the member's sparse map when it is sparse; it is
/// ignored otherwise.
pub fn read_member(
    source: &MountSource,
    record: &MemberRecord,
    extents: &[SparseExtent],
    offset: u64,
    len: u32,
) -> io::Result<Vec<u8>> {
    let Some((start, len)) = clamp(record.size, offset, len) else {
        return Ok(Vec::new());
    };

    if record.is_sparse {
        if extents.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sparse member {} has no extent map", record.full_path()),
            ));
        }
        return read_sparse(source, extents, start, len);
    }

    let mut buf = vec![0u8; len];
    source.read_exact_at(&mut buf, record.offset + start)?;
    Ok(buf)
}

/// Assemble `[start, start + len)` of a sparse member. Holes stay zero.
fn read_sparse(
    source: &MountSource,
    extents: &[SparseExtent],
    start: u64,
    len: usize,
) -> io::Result<Vec<u8>> {
    let end = start + len as u64;
    let mut buf = vec![0u8; len];

    for extent in extents {
        if extent.logical_offset >= end {
            break;
        }
        let lo = extent.logical_offset.max(start);
        let hi = extent.logical_end().min(end);
        if lo >= hi {
            continue;
        }
        let dst = &mut buf[(lo - start) as usize..(hi - start) as usize];
        source.read_exact_at(dst, extent.physical_offset + (lo - extent.logical_offset))?;
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(content: &[u8]) -> (tempfile::NamedTempFile, MountSource) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        let source = MountSource::open(file.path()).unwrap();
        (file, source)
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(10, 0, 4), Some((0, 4)));
        assert_eq!(clamp(10, 8, 4), Some((8, 2)));
        assert_eq!(clamp(10, 10, 4), None);
        assert_eq!(clamp(10, 50, 4), None);
        assert_eq!(clamp(10, 0, 0), None);
        assert_eq!(clamp(0, 0, 4), None);
    }

    #[test]
    fn test_plain_read_is_clamped() {
        let (_file, source) = source(b"HEADERhello worldTRAILER");
        let record = MemberRecord::file("", "greeting", 6, 11);

        assert_eq!(read_member(&source, &record, &[], 0, 5).unwrap(), b"hello");
        assert_eq!(read_member(&source, &record, &[], 6, 100).unwrap(), b"world");
        assert!(read_member(&source, &record, &[], 11, 5).unwrap().is_empty());
    }

    #[test]
    fn test_sparse_read_fills_holes() {
        // Stored data: "AAAA" then "BB", logically at 2 and 8 of a 12-byte file.
        let (_file, source) = source(b"xxAAAABByy");
        let record = MemberRecord::file("", "sparse", 2, 12).with_sparse(true);
        let extents = [SparseExtent::new(2, 2, 4), SparseExtent::new(8, 6, 2)];

        let all = read_member(&source, &record, &extents, 0, 64).unwrap();
        assert_eq!(all, b"\0\0AAAA\0\0BB\0\0");

        let middle = read_member(&source, &record, &extents, 4, 5).unwrap();
        assert_eq!(middle, b"AA\0\0B");

        let hole = read_member(&source, &record, &extents, 10, 2).unwrap();
        assert_eq!(hole, b"\0\0");
    }

    #[test]
    fn test_sparse_without_extents() {
        let (_file, source) = source(b"data");
        let record = MemberRecord::file("", "sparse", 0, 100).with_sparse(true);
        assert!(read_member(&source, &record, &[], 0, 10).is_err());
    }
}
