//! Storage backends for wardbus
//!
//! - Postgres: revocation ledger and account lookups for a deployment
//! - Memory: in-process ledger and account table (tests, single process)

mod memory;
mod postgres;

pub use memory::{MemoryIdentityStore, MemoryRevocationStore};
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::Identity;
pub use async_trait::async_trait;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Backend for revocation markers
///
/// Keys are opaque digests computed by the ledger. Every entry carries the
/// unix second at which it stops mattering; backends must never report an
/// entry as present at or after that instant.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Insert a marker that expires at `expires_at`. Re-inserting an existing
    /// key is a no-op.
    async fn insert(&self, key: &str, expires_at: u64) -> Result<(), StorageError>;

    /// Whether a live (unexpired at `now`) marker exists for `key`
    async fn contains(&self, key: &str, now: u64) -> Result<bool, StorageError>;

    /// Remove every marker expired at `now`, returning how many were removed
    async fn purge_expired(&self, now: u64) -> Result<usize, StorageError>;

    /// Number of stored markers, expired or not
    async fn len(&self) -> Result<usize, StorageError>;
}

/// Read-only account lookup
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, subject_id: &str) -> Result<Option<Identity>, StorageError>;
}
