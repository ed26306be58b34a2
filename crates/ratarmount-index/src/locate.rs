//! Where index files live.

use std::path::{Path, PathBuf};

const INDEX_SUFFIX: &str = ".index.sqlite";

/// Candidate index locations for `archive`, in lookup order.
///
/// 1. `<archive>.index.sqlite` next to the archive
/// 2. `~/.ratarmount/<absolute archive path, '/' as '_'>.index.sqlite`
pub fn index_candidates(archive: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![with_suffix(archive, INDEX_SUFFIX)];

    if let Some(home) = dirs::home_dir() {
        let absolute = archive
            .canonicalize()
            .unwrap_or_else(|_| archive.to_path_buf());
        let escaped = absolute.to_string_lossy().replace('/', "_");
        candidates.push(
            home.join(".ratarmount")
                .join(format!("{escaped}{INDEX_SUFFIX}")),
        );
    }

    candidates
}

/// First existing index for `archive`.
pub fn locate_index(archive: &Path) -> Option<PathBuf> {
    index_candidates(archive).into_iter().find(|p| p.is_file())
}

/// Index of the archive nested in the member at `offset_header`.
///
/// Nested indexes live in a `.d` directory next to their parent's index:
/// `<parent index>.d/<offset_header>.index.sqlite`.
pub fn nested_index_path(parent_index: &Path, offset_header: u64) -> PathBuf {
    with_suffix(parent_index, ".d").join(format!("{offset_header}{INDEX_SUFFIX}"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
