//! Server assembly and wire messages

use crate::auth::{
    spawn_sweeper, AuthorizationGate, CredentialCodec, RevocationLedger, Role, SigningSecret,
};
use crate::clock::{Clock, SystemClock};
use crate::scopes::Scope;
use crate::server::connections::ConnectionRegistry;
use crate::server::router::{Event, EventRouter};
use crate::server::websocket::{run_websocket_server, WsState};
use crate::storage::{IdentityStore, RevocationStore};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a token (when no cookie or bearer header was sent)
    Auth { token: String },
    /// Subscribe to a scope
    JoinScope { scope: String },
    /// Unsubscribe from a scope
    LeaveScope { scope: String },
    /// Ping for keepalive
    Ping { seq: u64 },
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication successful
    AuthOk {
        subject_id: String,
        role: Role,
        scopes: Vec<Scope>,
    },
    /// Authentication failed
    AuthError { message: String },
    /// Scope join confirmed
    Joined { scope: String },
    /// Scope join denied
    JoinError { scope: String, message: String },
    /// Scope left
    Left { scope: String },
    /// Domain event on a subscribed scope
    Event {
        kind: String,
        payload: serde_json::Value,
    },
    /// Pong response
    Pong { seq: u64 },
    /// Generic error
    Error { message: String },
}

/// Body of `POST /events`: a producer asking for one event to be routed
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub scopes: Vec<Scope>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Secret for signing session credentials
    pub secret: SigningSecret,
    /// Lifetime of issued credentials
    pub session_ttl: Duration,
    /// How often expired revocation markers are purged
    pub sweep_interval: Duration,
    /// Outbound queue depth per connection
    pub queue_depth: usize,
    /// Mark session cookies `Secure`
    pub secure_cookies: bool,
    /// How long a socket without a header credential may wait for `auth`
    pub auth_timeout: Duration,
}

impl ServerConfig {
    pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_QUEUE_DEPTH: usize = 100;
    pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(bind_addr: SocketAddr, secret: SigningSecret) -> Self {
        Self {
            bind_addr,
            secret,
            session_ttl: Self::DEFAULT_SESSION_TTL,
            sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
            queue_depth: Self::DEFAULT_QUEUE_DEPTH,
            secure_cookies: false,
            auth_timeout: Self::DEFAULT_AUTH_TIMEOUT,
        }
    }
}

/// The main wardbus server
pub struct WardbusServer {
    config: ServerConfig,
    gate: AuthorizationGate,
    connections: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
}

impl WardbusServer {
    pub fn new(
        config: ServerConfig,
        revocations: Arc<dyn RevocationStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self::with_clock(config, revocations, identities, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ServerConfig,
        revocations: Arc<dyn RevocationStore>,
        identities: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = CredentialCodec::new(config.secret.clone(), clock.clone());
        let ledger = RevocationLedger::new(revocations, clock);
        let gate = AuthorizationGate::new(codec, ledger, identities, config.session_ttl);

        let connections = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(EventRouter::new(connections.clone()));

        Self {
            config,
            gate,
            connections,
            router,
        }
    }

    /// Get a reference to the event router (for producers outside the server)
    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        self.connections.clone()
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    /// Deliver an event to its live recipients
    pub fn publish(&self, event: &Event) -> usize {
        self.router.deliver(event)
    }

    /// Handler state for the HTTP/WebSocket transport
    pub fn ws_state(&self) -> WsState {
        WsState {
            connections: self.connections.clone(),
            router: self.router.clone(),
            gate: self.gate.clone(),
            queue_depth: self.config.queue_depth,
            secure_cookies: self.config.secure_cookies,
            auth_timeout: self.config.auth_timeout,
        }
    }

    /// Run the server until the listener fails. The sweeper stops with it,
    /// including when this future is dropped.
    pub async fn run(&self) -> Result<()> {
        let _sweeper = spawn_sweeper(self.gate.ledger().clone(), self.config.sweep_interval);

        info!(
            addr = %self.config.bind_addr,
            session_ttl_secs = self.config.session_ttl.as_secs(),
            "wardbus server listening"
        );

        run_websocket_server(self.config.bind_addr, self.ws_state()).await
    }
}
