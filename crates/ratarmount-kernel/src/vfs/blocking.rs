//! Index queries and archive reads are synchronous; they run on tokio's
//! blocking pool, never on a runtime worker.

use super::error::{VfsError, VfsResult};

/// Run `f` on the blocking pool and wait for it.
pub(super) async fn run<T, F>(f: F) -> VfsResult<T>
where
    F: FnOnce() -> VfsResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VfsError::io(format!("blocking task failed: {e}")))?
}
