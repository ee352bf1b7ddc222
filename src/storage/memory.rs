//! In-memory backends
//!
//! The revocation store has no native per-key expiry. Expired markers are
//! invisible to lookups immediately and are physically dropped by
//! `purge_expired`, which the ledger sweeper calls on an interval.

use crate::auth::Identity;
use crate::storage::{async_trait, IdentityStore, RevocationStore, StorageError};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Revocation markers keyed by token digest
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    /// key -> expiry (unix seconds)
    entries: RwLock<HashMap<String, u64>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn insert(&self, key: &str, expires_at: u64) -> Result<(), StorageError> {
        // Markers are never updated once written
        self.entries
            .write()
            .entry(key.to_string())
            .or_insert(expires_at);
        Ok(())
    }

    async fn contains(&self, key: &str, now: u64) -> Result<bool, StorageError> {
        Ok(self
            .entries
            .read()
            .get(key)
            .is_some_and(|&expires_at| now < expires_at))
    }

    async fn purge_expired(&self, now: u64) -> Result<usize, StorageError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, expires_at| now < *expires_at);
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.read().len())
    }
}

/// Account table held in memory
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identities: DashMap<String, Identity>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account
    pub fn insert(&self, identity: Identity) {
        self.identities
            .insert(identity.subject_id().to_string(), identity);
    }

    /// Remove an account
    pub fn remove(&self, subject_id: &str) -> Option<Identity> {
        self.identities.remove(subject_id).map(|(_, identity)| identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl FromIterator<Identity> for MemoryIdentityStore {
    fn from_iter<T: IntoIterator<Item = Identity>>(iter: T) -> Self {
        let store = MemoryIdentityStore::new();
        for identity in iter {
            store.insert(identity);
        }
        store
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_id(&self, subject_id: &str) -> Result<Option<Identity>, StorageError> {
        Ok(self.identities.get(subject_id).map(|r| r.value().clone()))
    }
}
