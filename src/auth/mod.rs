//! Authentication and authorization
//!
//! - Credentials: stateless `sess-` tokens, HMAC-signed, carrying subject,
//!   role, and expiry
//! - Revocation: ledger of logged-out credentials, each marker expiring
//!   with its credential
//! - Gate: the per-request check combining both with an account lookup
//!   and a role requirement

mod credentials;
mod gate;
mod identity;
mod revocation;

pub use credentials::{
    Claims, Credential, CredentialCodec, CredentialError, SigningSecret, SESSION_TOKEN_PREFIX,
};
pub use gate::{AuthError, AuthorizationGate};
pub use identity::{Identity, Role, RoleRequirement};
pub use revocation::{ledger_key, spawn_sweeper, RevocationLedger, SweeperHandle};
