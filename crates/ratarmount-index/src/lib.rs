//! # ratarmount-index
//!
//! Read-only access to the SQLite member index that an index-builder writes
//! next to each archive.
//!
//! - [`IndexStore`] - pooled, read-only query façade over the `files` table
//! - [`MemberRecord`] - one row of that table
//! - [`SparseExtent`] - one data segment of a sparse member
//! - [`IndexWriter`] - creates index files (fixtures and tooling only)
//!
//! ## Concurrency
//!
//! [`IndexStore`] hands each caller its own read-only connection from a
//! small pool. The pool lock only covers checkout and return.

mod error;
mod locate;
mod pool;
mod record;
mod schema;
mod store;
mod writer;

pub use error::{IndexError, IndexResult};
pub use locate::{index_candidates, locate_index, nested_index_path};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use record::{MemberRecord, SparseExtent};
pub use schema::{FILES_COLUMNS, SCHEMA};
pub use store::IndexStore;
pub use writer::IndexWriter;

#[cfg(feature = "fixtures")]
pub mod fixture;
