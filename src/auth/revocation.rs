//! Revocation ledger
//!
//! Holds one marker per revoked, not-yet-expired credential. A marker lives
//! exactly as long as the credential it revokes, so the ledger is bounded by
//! the number of revoked credentials still in flight, never by the number of
//! historical logouts.

use crate::clock::{Clock, SystemClock};
use crate::storage::{RevocationStore, StorageError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LEDGER_KEY_PREFIX: &str = "token:";

/// Ledger key for a token. The raw token is never stored.
pub fn ledger_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{}{}", LEDGER_KEY_PREFIX, URL_SAFE_NO_PAD.encode(digest))
}

#[derive(Clone)]
pub struct RevocationLedger {
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationLedger {
    pub fn new(store: Arc<dyn RevocationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_system_clock(store: Arc<dyn RevocationStore>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    /// Revoke `token` until `expires_at`. Returns whether a marker was
    /// written; a token that has already expired needs none.
    pub async fn revoke(&self, token: &str, expires_at: u64) -> Result<bool, StorageError> {
        if expires_at <= self.clock.now() {
            debug!("Skipping revocation of already expired credential");
            return Ok(false);
        }

        self.store.insert(&ledger_key(token), expires_at).await?;
        debug!(expires_at, "Credential revoked");
        Ok(true)
    }

    /// Whether `token` is currently revoked. Errors mean the answer is
    /// unknown and callers must treat the token as unsafe.
    pub async fn is_revoked(&self, token: &str) -> Result<bool, StorageError> {
        self.store.contains(&ledger_key(token), self.clock.now()).await
    }

    /// Drop every expired marker
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        self.store.purge_expired(self.clock.now()).await
    }

    /// Number of markers currently held
    pub async fn len(&self) -> Result<usize, StorageError> {
        self.store.len().await
    }
}

/// Handle to a running sweeper. Dropping it stops the sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Periodically purge expired markers until the handle is dropped or aborted.
pub fn spawn_sweeper(ledger: RevocationLedger, interval: Duration) -> SweeperHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match ledger.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Purged expired revocations"),
                Err(e) => warn!(error = %e, "Revocation sweep failed"),
            }
        }
    });

    SweeperHandle { task }
}
