//! Persistence gateway boundary.
//!
//! Repositories in this crate run their statements inside a caller-owned
//! [`Session`]. The caller decides when to commit or roll back; repositories
//! never open or close a top-level transaction on the caller's behalf.

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use postgres::{PgSession, install_schema};

/// Storage-level failure.
///
/// These are **infrastructure errors** (transport, constraint, decoding). They
/// are propagated to the caller unchanged; nothing in this crate retries them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The database rejected or failed the statement.
    #[error("storage error: {0}")]
    Storage(String),

    /// A uniqueness or serialization conflict with a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row could not be decoded into its domain type.
    #[error("decode error: {0}")]
    Decode(String),

    /// The connection pool or session is no longer usable.
    #[error("store closed: {0}")]
    Closed(String),
}

/// A transactional unit of work against a store.
///
/// Dropping a session without calling [`Session::commit`] discards every change
/// made through it.
#[async_trait]
pub trait Session: Send {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
