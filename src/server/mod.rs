//! wardbus server implementation
//!
//! Handles WebSocket connections, scope membership, and event fan-out.

mod carrier;
mod connections;
mod router;
pub mod transport;
pub mod websocket;

pub use carrier::{token_from_headers, CredentialCarrier, HeaderCarrier, SESSION_COOKIE};
pub use connections::{ClientConnection, ConnectionRegistry, JoinError, OutboundMessage};
pub use router::{Event, EventError, EventRouter};
pub use transport::{ClientMessage, ServerConfig, ServerMessage, WardbusServer};
pub use websocket::{create_router, run_websocket_server, WsState};
