//! Event routing and fan-out
//!
//! Delivery is at-most-once and best-effort: each recipient gets a
//! non-blocking enqueue on its own outbound queue. A recipient whose queue
//! is full or gone loses that event and nobody else notices.

use crate::scopes::Scope;
use crate::server::connections::{ClientConnection, ConnectionRegistry, OutboundMessage};
use crate::server::transport::ServerMessage;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event kind cannot be empty")]
    EmptyKind,

    #[error("event must target at least one scope")]
    NoScopes,
}

/// A domain event addressed to one or more scopes
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: String,
    payload: Value,
    scopes: BTreeSet<Scope>,
}

impl Event {
    pub fn new(
        kind: impl Into<String>,
        payload: Value,
        scopes: impl IntoIterator<Item = Scope>,
    ) -> Result<Self, EventError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(EventError::EmptyKind);
        }

        let scopes: BTreeSet<Scope> = scopes.into_iter().collect();
        if scopes.is_empty() {
            return Err(EventError::NoScopes);
        }

        Ok(Self {
            kind,
            payload,
            scopes,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn scopes(&self) -> &BTreeSet<Scope> {
        &self.scopes
    }
}

/// Routes events to subscribed connections
#[derive(Clone)]
pub struct EventRouter {
    connections: Arc<ConnectionRegistry>,
}

impl EventRouter {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Connections subscribed to any of the event's scopes, each once
    pub fn recipients(&self, event: &Event) -> Vec<Arc<ClientConnection>> {
        let mut recipients: HashMap<Uuid, Arc<ClientConnection>> = HashMap::new();
        for scope in event.scopes() {
            for conn in self.connections.members_of(scope) {
                recipients.entry(conn.id).or_insert(conn);
            }
        }
        recipients.into_values().collect()
    }

    /// Deliver an event to every matching connection exactly once.
    /// Returns the number of connections it was queued for.
    pub fn deliver(&self, event: &Event) -> usize {
        let recipients = self.recipients(event);

        if recipients.is_empty() {
            debug!(kind = %event.kind(), "No live recipients for event");
            return 0;
        }

        let msg = match OutboundMessage::json(&ServerMessage::Event {
            kind: event.kind().to_string(),
            payload: event.payload().clone(),
        }) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(kind = %event.kind(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        debug!(kind = %event.kind(), recipient_count = recipients.len(), "Routing event");

        let mut delivered = 0;
        for recipient in recipients {
            match recipient.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // Expected during rapid disconnect or for a slow reader
                    debug!(
                        conn_id = %recipient.id,
                        error = %e,
                        "Failed to queue event for recipient (buffer full or disconnected)"
                    );
                }
            }
        }

        delivered
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }
}
