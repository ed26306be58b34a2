//! Read-only connection pool.
//!
//! SQLite connections are `Send` but not `Sync`, so concurrent readers each
//! need their own. Idle connections are kept on a stack; the lock is held
//! only while pushing or popping, never while a query runs.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connections retained between queries.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle: 8 }
    }
}

/// Pool of read-only connections to one index file.
pub struct ConnectionPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    config: PoolConfig,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.path)
            .field("idle", &self.idle.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool seeded with an already opened connection.
    pub(crate) fn with_connection(path: &Path, conn: Connection, config: PoolConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            idle: Mutex::new(vec![conn]),
            config,
        }
    }

    /// Open a new read-only connection to `path`.
    pub fn connect(path: &Path) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    /// Check out a connection, opening a new one if none is idle.
    pub fn get(&self) -> rusqlite::Result<PooledConnection<'_>> {
        let conn = self.idle.lock().pop();
        let conn = match conn {
            Some(conn) => conn,
            None => {
                tracing::trace!(path = %self.path.display(), "opening pooled index connection");
                Self::connect(&self.path)?
            }
        };
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
        })
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Drop all idle connections.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    fn put_back(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push(conn);
        }
    }
}

/// A checked-out connection; returns to the pool on drop.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is only taken on drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
