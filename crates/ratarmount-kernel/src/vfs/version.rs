//! Version selection among records that share a path.
//!
//! An archive may contain the same path several times when it was appended
//! to. Records are ordered by header offset, which grows with recency.

use ratarmount_index::MemberRecord;
use std::fmt;

/// Which version of a member to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSelector {
    /// The record with the greatest header offset.
    #[default]
    MostRecent,
    /// 1-based position counting from the oldest record.
    NthFromOldest(u64),
    /// Distance from the newest record: `1` is the second-most-recent.
    NthFromNewest(u64),
}

impl VersionSelector {
    /// Interpret a signed version number.
    ///
    /// `0` is the most recent, `n > 0` the n-th oldest (1 = oldest) and
    /// `-n` the record `n` positions before the most recent.
    pub fn from_raw(version: i64) -> Self {
        match version {
            0 => Self::MostRecent,
            v if v > 0 => Self::NthFromOldest(v as u64),
            v => Self::NthFromNewest(v.unsigned_abs()),
        }
    }

    /// The signed version number this selector stands for.
    pub fn raw(&self) -> i64 {
        match *self {
            Self::MostRecent => 0,
            Self::NthFromOldest(n) => n as i64,
            Self::NthFromNewest(n) => -(n as i64),
        }
    }

    /// Pick one record. `None` if the position is out of range.
    pub fn select(&self, mut versions: Vec<MemberRecord>) -> Option<MemberRecord> {
        versions.sort_by_key(|r| r.offset_header);
        let len = versions.len();
        let index = match *self {
            Self::MostRecent => len.checked_sub(1)?,
            Self::NthFromOldest(n) => usize::try_from(n).ok()?.checked_sub(1)?,
            Self::NthFromNewest(n) => len.checked_sub(1)?.checked_sub(usize::try_from(n).ok()?)?,
        };
        if index < len {
            Some(versions.swap_remove(index))
        } else {
            None
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MostRecent => write!(f, "most recent"),
            Self::NthFromOldest(n) => write!(f, "#{n} from oldest"),
            Self::NthFromNewest(n) => write!(f, "#{n} before newest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(headers: &[u64]) -> Vec<MemberRecord> {
        headers
            .iter()
            .map(|&h| MemberRecord::file("", "log", h + 512, 1).with_offset_header(h))
            .collect()
    }

    fn header(selector: VersionSelector, headers: &[u64]) -> Option<u64> {
        selector.select(versions(headers)).map(|r| r.offset_header)
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(VersionSelector::from_raw(0), VersionSelector::MostRecent);
        assert_eq!(VersionSelector::from_raw(3), VersionSelector::NthFromOldest(3));
        assert_eq!(VersionSelector::from_raw(-1), VersionSelector::NthFromNewest(1));
        assert_eq!(VersionSelector::from_raw(-7).raw(), -7);
    }

    #[test]
    fn test_two_versions() {
        let headers = [10, 50];
        assert_eq!(header(VersionSelector::from_raw(0), &headers), Some(50));
        assert_eq!(header(VersionSelector::from_raw(1), &headers), Some(10));
        assert_eq!(header(VersionSelector::from_raw(2), &headers), Some(50));
        assert_eq!(header(VersionSelector::from_raw(3), &headers), None);
        assert_eq!(header(VersionSelector::from_raw(-1), &headers), Some(10));
        assert_eq!(header(VersionSelector::from_raw(-2), &headers), None);
    }

    #[test]
    fn test_unsorted_input() {
        let headers = [300, 100, 200];
        assert_eq!(header(VersionSelector::MostRecent, &headers), Some(300));
        assert_eq!(header(VersionSelector::NthFromOldest(1), &headers), Some(100));
        assert_eq!(header(VersionSelector::NthFromNewest(1), &headers), Some(200));
    }

    #[test]
    fn test_empty() {
        assert_eq!(header(VersionSelector::MostRecent, &[]), None);
        assert_eq!(header(VersionSelector::NthFromOldest(1), &[]), None);
        assert_eq!(header(VersionSelector::NthFromNewest(0), &[]), None);
    }

    #[test]
    fn test_single_version() {
        assert_eq!(header(VersionSelector::MostRecent, &[7]), Some(7));
        assert_eq!(header(VersionSelector::NthFromOldest(1), &[7]), Some(7));
        assert_eq!(header(VersionSelector::NthFromOldest(0), &[7]), None);
    }
}
