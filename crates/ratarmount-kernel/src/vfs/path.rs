//! Request path handling.
//!
//! Paths arrive absolute (`/a/b`). The index stores a member under its
//! parent path, with `""` for the archive root, so `/a/b` is looked up as
//! `("/a", "b")` and `/b` as `("", "b")`.

use std::path::Path;

use super::error::{VfsError, VfsResult};

/// Suffix of the virtual directory listing every version of a member.
pub const VERSIONS_SUFFIX: &str = ".versions";

/// Borrow `path` as UTF-8, the encoding of index keys.
pub fn as_str(path: &Path) -> VfsResult<&str> {
    path.to_str()
        .ok_or_else(|| VfsError::invalid_path(path.to_string_lossy()))
}

/// Validate `path` and strip trailing slashes. The root stays `/`.
pub fn normalize(path: &str) -> VfsResult<&str> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(VfsError::invalid_path(format!(
            "path should start with '/': {path:?}"
        )));
    }
    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/" } else { trimmed })
}

/// Split a normalized path at its last `/` into `(parent, name)`.
pub fn split(path: &str) -> VfsResult<(&str, &str)> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(VfsError::invalid_path(path));
    }
    // Starts with '/', so there is at least one slash.
    let last = path.rfind('/').unwrap_or(0);
    Ok((&path[..last], &path[last + 1..]))
}

/// Parent key used by the index for listing the children of `dir`.
pub fn dir_key(dir: &str) -> &str {
    if dir == "/" { "" } else { dir }
}

/// A path into a virtual version directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionsPath<'a> {
    /// `<base>.versions` itself.
    Dir { base: &'a str },
    /// `<base>.versions/<n><rest>`. `rest` is empty or starts with `/` and
    /// names a path inside that version.
    Entry {
        base: &'a str,
        version: u64,
        rest: &'a str,
    },
}

impl<'a> VersionsPath<'a> {
    /// Recognize a version-directory path. `path` must be normalized.
    ///
    /// The leftmost `<base>.versions` component decides.
    pub fn parse(path: &'a str) -> Option<Self> {
        let mut from = 0;
        while let Some(found) = path[from..].find(VERSIONS_SUFFIX) {
            let base = &path[..from + found];
            let end = from + found + VERSIONS_SUFFIX.len();
            from = end;
            if !Self::valid_base(base) {
                continue;
            }

            let after = &path[end..];
            if after.is_empty() {
                return Some(Self::Dir { base });
            }
            let Some(after) = after.strip_prefix('/') else {
                continue;
            };
            let (number, rest) = after.split_at(after.find('/').unwrap_or(after.len()));
            if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            match number.parse::<u64>() {
                Ok(version) if version > 0 => {
                    return Some(Self::Entry {
                        base,
                        version,
                        rest,
                    });
                }
                _ => continue,
            }
        }
        None
    }

    fn valid_base(base: &str) -> bool {
        base.starts_with('/') && !base.ends_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("///").unwrap(), "/");
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert!(matches!(normalize(""), Err(VfsError::InvalidPath(_))));
        assert!(matches!(normalize("a/b"), Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn test_split() {
        assert_eq!(split("/file.txt").unwrap(), ("", "file.txt"));
        assert_eq!(split("/a/b/c").unwrap(), ("/a/b", "c"));
        assert!(split("relative").is_err());
        assert!(split("").is_err());
    }

    #[test]
    fn test_dir_key() {
        assert_eq!(dir_key("/"), "");
        assert_eq!(dir_key("/a"), "/a");
    }

    #[test]
    fn test_versions_path() {
        assert_eq!(
            VersionsPath::parse("/dir/log.versions"),
            Some(VersionsPath::Dir { base: "/dir/log" })
        );
        assert_eq!(
            VersionsPath::parse("/log.versions/2"),
            Some(VersionsPath::Entry {
                base: "/log",
                version: 2,
                rest: ""
            })
        );
        assert_eq!(
            VersionsPath::parse("/inner.tar.versions/1/docs/readme"),
            Some(VersionsPath::Entry {
                base: "/inner.tar",
                version: 1,
                rest: "/docs/readme"
            })
        );
        assert_eq!(VersionsPath::parse("/log.versions/0"), None);
        assert_eq!(VersionsPath::parse("/log.versions/x"), None);
        assert_eq!(VersionsPath::parse("/.versions"), None);
        assert_eq!(VersionsPath::parse("/log"), None);
        assert_eq!(VersionsPath::parse("/log.versionsx/1"), None);
        assert_eq!(VersionsPath::parse("/log.versions/+1"), None);
    }
}
