//! Live connection registry
//!
//! Memberships are kept per scope in a sharded map, so joins and leaves on
//! unrelated scopes do not contend. Each connection also tracks its own scope
//! set behind a mutex; join and leave take that mutex first, which keeps a
//! late subscription from resurrecting a connection that already left.

use crate::auth::Identity;
use crate::scopes::Scope;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Message to send to a client (serialized JSON, shared across recipients)
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Arc<str>,
}

impl OutboundMessage {
    pub fn new(payload: impl Into<Arc<str>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(value)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("forbidden")]
    Forbidden,

    #[error("connection is not registered")]
    UnknownConnection,
}

#[derive(Debug, Default)]
struct Subscriptions {
    scopes: HashSet<Scope>,
    closed: bool,
}

/// A connected client
pub struct ClientConnection {
    /// Unique connection ID
    pub id: Uuid,
    /// Identity captured when the connection was authorized
    identity: Identity,
    subscriptions: Mutex<Subscriptions>,
    /// Channel for sending messages to this client
    tx: mpsc::Sender<OutboundMessage>,
    /// Messages dropped because the queue was full or closed
    dropped: AtomicU64,
}

impl ClientConnection {
    pub fn new(identity: Identity, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            subscriptions: Mutex::new(Subscriptions::default()),
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Scopes this connection is currently subscribed to
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.subscriptions.lock().scopes.iter().cloned().collect();
        scopes.sort();
        scopes
    }

    pub fn is_subscribed(&self, scope: &Scope) -> bool {
        self.subscriptions.lock().scopes.contains(scope)
    }

    /// Queue a message without waiting. A full or closed queue drops it.
    pub fn send(&self, msg: OutboundMessage) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.tx.try_send(msg).inspect_err(|_| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        })
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Tracks live connections and their scope memberships
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    /// All active connections by ID
    connections: Arc<DashMap<Uuid, Arc<ClientConnection>>>,
    /// scope -> members
    scopes: Arc<DashMap<Scope, HashMap<Uuid, Arc<ClientConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and subscribe it to every scope its identity is
    /// entitled to. Returns the granted scopes. A connection that has already
    /// left cannot join again.
    pub fn join(&self, conn: Arc<ClientConnection>) -> Result<Vec<Scope>, JoinError> {
        let entitled = conn.identity().entitled_scopes();
        if let Some(scope) = entitled.iter().find(|s| !conn.identity().can_join(s)) {
            debug!(conn_id = %conn.id, scope = %scope, "Scope join forbidden");
            return Err(JoinError::Forbidden);
        }

        let mut subs = conn.subscriptions.lock();
        if subs.closed {
            return Err(JoinError::UnknownConnection);
        }

        self.connections.insert(conn.id, conn.clone());
        for scope in &entitled {
            self.add_member(&conn, &mut subs, scope);
        }
        drop(subs);

        debug!(conn_id = %conn.id, subject_id = %conn.identity().subject_id(), "Connection joined");
        Ok(entitled)
    }

    /// Subscribe a registered connection to one more scope
    pub fn subscribe(&self, conn_id: Uuid, scope: &Scope) -> Result<(), JoinError> {
        let conn = self.get(conn_id).ok_or(JoinError::UnknownConnection)?;
        self.subscribe_connection(&conn, scope)
    }

    fn subscribe_connection(&self, conn: &Arc<ClientConnection>, scope: &Scope) -> Result<(), JoinError> {
        if !conn.identity().can_join(scope) {
            debug!(conn_id = %conn.id, scope = %scope, "Scope join forbidden");
            return Err(JoinError::Forbidden);
        }

        let mut subs = conn.subscriptions.lock();
        if subs.closed {
            return Err(JoinError::UnknownConnection);
        }

        self.add_member(conn, &mut subs, scope);
        Ok(())
    }

    fn add_member(&self, conn: &Arc<ClientConnection>, subs: &mut Subscriptions, scope: &Scope) {
        if subs.scopes.insert(scope.clone()) {
            self.scopes
                .entry(scope.clone())
                .or_default()
                .insert(conn.id, conn.clone());
        }
    }

    /// Drop one scope from a connection. Returns whether it was subscribed.
    pub fn unsubscribe(&self, conn_id: Uuid, scope: &Scope) -> bool {
        let Some(conn) = self.get(conn_id) else {
            return false;
        };

        let mut subs = conn.subscriptions.lock();
        if !subs.scopes.remove(scope) {
            return false;
        }
        self.remove_member(scope, conn_id);
        true
    }

    /// Remove a connection and all of its memberships. Safe to call any
    /// number of times.
    pub fn leave(&self, conn_id: Uuid) -> bool {
        let Some((_, conn)) = self.connections.remove(&conn_id) else {
            return false;
        };

        let mut subs = conn.subscriptions.lock();
        subs.closed = true;
        for scope in subs.scopes.drain() {
            self.remove_member(&scope, conn_id);
        }

        debug!(conn_id = %conn_id, "Connection left");
        true
    }

    fn remove_member(&self, scope: &Scope, conn_id: Uuid) {
        if let Some(mut members) = self.scopes.get_mut(scope) {
            members.remove(&conn_id);
        }
        self.scopes.remove_if(scope, |_, members| members.is_empty());
    }

    /// Live connections subscribed to `scope`
    pub fn members_of(&self, scope: &Scope) -> Vec<Arc<ClientConnection>> {
        self.scopes
            .get(scope)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a connection by ID
    pub fn get(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of scopes with at least one member
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}
