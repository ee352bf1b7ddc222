//! wardbus - revocable sessions and authorization-aware live event routing
//!
//! Actors authenticate with short-lived signed credentials that can be
//! revoked before they expire. Authenticated live connections are subscribed
//! to identity, group, and role scopes, and domain events are delivered once
//! to every connection subscribed to any of their target scopes.

pub mod auth;
pub mod clock;
pub mod notify;
pub mod scopes;
pub mod server;
pub mod storage;

pub use auth::{AuthError, AuthorizationGate, Credential, CredentialCodec, Identity, Role, RoleRequirement};
pub use scopes::Scope;
pub use server::{Event, EventRouter, WardbusServer};
