//! Authorization gate
//!
//! Every request and every connection join passes through
//! [`AuthorizationGate::authorize`]. Each check ends in exactly one terminal
//! state; nothing is retried here.

use crate::auth::credentials::{Credential, CredentialCodec, CredentialError};
use crate::auth::identity::{Identity, RoleRequirement};
use crate::auth::revocation::RevocationLedger;
use crate::storage::IdentityStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credential provided")]
    NoCredential,

    #[error("invalid credential")]
    InvalidSignature,

    #[error("credential expired")]
    Expired,

    #[error("credential revoked")]
    Revoked,

    #[error("revocation check unavailable: {0}")]
    RevocationCheckUnavailable(String),

    #[error("unknown subject")]
    UnknownSubject,

    #[error("identity lookup failed: {0}")]
    IdentityLookupFailed(String),

    #[error("forbidden")]
    Forbidden,
}

impl AuthError {
    /// Authenticated, but not allowed
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::Forbidden)
    }
}

impl From<CredentialError> for AuthError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Expired => AuthError::Expired,
            CredentialError::InvalidSignature
            | CredentialError::Malformed(_)
            | CredentialError::Encoding(_) => AuthError::InvalidSignature,
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    codec: CredentialCodec,
    ledger: RevocationLedger,
    identities: Arc<dyn IdentityStore>,
    session_ttl: Duration,
}

impl AuthorizationGate {
    pub fn new(
        codec: CredentialCodec,
        ledger: RevocationLedger,
        identities: Arc<dyn IdentityStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            ledger,
            identities,
            session_ttl,
        }
    }

    pub fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Validate a token and load the identity behind it
    pub async fn authorize(
        &self,
        token: Option<&str>,
        requirement: RoleRequirement,
    ) -> Result<Identity, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::NoCredential)?;

        let credential = self.codec.verify(token)?;

        match self.ledger.is_revoked(token).await {
            Ok(false) => {}
            Ok(true) => return Err(AuthError::Revoked),
            Err(e) => {
                warn!(error = %e, "Revocation store unreachable, rejecting credential");
                return Err(AuthError::RevocationCheckUnavailable(e.to_string()));
            }
        }

        let identity = self.load_identity(credential.subject_id()).await?;

        if identity.role() != credential.role() {
            debug!(
                subject_id = %identity.subject_id(),
                credential_role = %credential.role(),
                current_role = %identity.role(),
                "Role changed since credential was issued"
            );
        }

        if !requirement.is_satisfied_by(identity.role()) {
            return Err(AuthError::Forbidden);
        }

        Ok(identity)
    }

    /// Issue a fresh credential for an existing subject. Password checks
    /// happen before this is called.
    pub async fn login(&self, subject_id: &str) -> Result<(Credential, Identity), AuthError> {
        let identity = self.load_identity(subject_id).await?;
        let credential = self
            .codec
            .issue(identity.subject_id(), identity.role(), self.session_ttl)?;

        debug!(subject_id = %identity.subject_id(), expires_at = credential.expires_at(), "Session issued");
        Ok((credential, identity))
    }

    /// Revoke a token for the rest of its natural lifetime. Tokens that are
    /// invalid or already expired need no marker and are ignored.
    pub async fn logout(&self, token: &str) -> Result<bool, AuthError> {
        let credential = match self.codec.verify(token) {
            Ok(credential) => credential,
            Err(e) => {
                debug!(error = %e, "Logout with unusable credential, nothing to revoke");
                return Ok(false);
            }
        };

        self.ledger
            .revoke(token, credential.expires_at())
            .await
            .map_err(|e| {
                warn!(error = %e, "Revocation store unreachable during logout");
                AuthError::RevocationCheckUnavailable(e.to_string())
            })
    }

    async fn load_identity(&self, subject_id: &str) -> Result<Identity, AuthError> {
        match self.identities.find_by_id(subject_id).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(AuthError::UnknownSubject),
            Err(e) => {
                warn!(error = %e, "Identity store lookup failed");
                Err(AuthError::IdentityLookupFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::SigningSecret;
    use crate::auth::identity::Role;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryIdentityStore, MemoryRevocationStore};

    const TTL: Duration = Duration::from_secs(3600);

    fn gate() -> (AuthorizationGate, Arc<ManualClock>, Arc<MemoryIdentityStore>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let identities = Arc::new(MemoryIdentityStore::new());
        identities.insert(Identity::new("u1", Role::Reporter, Some("g7".to_string())).unwrap());
        identities.insert(Identity::new("a1", Role::Administrator, None).unwrap());

        let codec = CredentialCodec::new(SigningSecret::new(b"gate-test".to_vec()), clock.clone());
        let ledger = RevocationLedger::new(Arc::new(MemoryRevocationStore::new()), clock.clone());
        let gate = AuthorizationGate::new(codec, ledger, identities.clone(), TTL);
        (gate, clock, identities)
    }

    #[tokio::test]
    async fn test_missing_token() {
        let (gate, _, _) = gate();
        assert_eq!(
            gate.authorize(None, RoleRequirement::Any).await.unwrap_err(),
            AuthError::NoCredential
        );
        assert_eq!(
            gate.authorize(Some(""), RoleRequirement::Any).await.unwrap_err(),
            AuthError::NoCredential
        );
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let (gate, _, _) = gate();
        assert_eq!(
            gate.authorize(Some("not-a-token"), RoleRequirement::Any)
                .await
                .unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[tokio::test]
    async fn test_login_then_authorize() {
        let (gate, _, _) = gate();
        let (credential, identity) = gate.login("u1").await.unwrap();
        assert_eq!(identity.role(), Role::Reporter);

        let authorized = gate
            .authorize(Some(credential.as_str()), RoleRequirement::Any)
            .await
            .unwrap();
        assert_eq!(authorized, identity);
    }

    #[tokio::test]
    async fn test_login_unknown_subject() {
        let (gate, _, _) = gate();
        assert_eq!(gate.login("ghost").await.unwrap_err(), AuthError::UnknownSubject);
    }

    #[tokio::test]
    async fn test_expired() {
        let (gate, clock, _) = gate();
        let (credential, _) = gate.login("u1").await.unwrap();
        clock.advance(TTL.as_secs());
        assert_eq!(
            gate.authorize(Some(credential.as_str()), RoleRequirement::Any)
                .await
                .unwrap_err(),
            AuthError::Expired
        );
    }

    #[tokio::test]
    async fn test_logout_revokes() {
        let (gate, _, _) = gate();
        let (credential, _) = gate.login("u1").await.unwrap();

        assert!(gate.logout(credential.as_str()).await.unwrap());
        assert_eq!(
            gate.authorize(Some(credential.as_str()), RoleRequirement::Any)
                .await
                .unwrap_err(),
            AuthError::Revoked
        );
    }

    #[tokio::test]
    async fn test_logout_of_unusable_token_writes_nothing() {
        let (gate, clock, _) = gate();
        assert!(!gate.logout("sess-forged.token").await.unwrap());

        let (credential, _) = gate.login("u1").await.unwrap();
        clock.advance(TTL.as_secs() + 1);
        assert!(!gate.logout(credential.as_str()).await.unwrap());
        assert_eq!(gate.ledger().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deleted_account_is_unknown() {
        let (gate, _, identities) = gate();
        let (credential, _) = gate.login("u1").await.unwrap();
        identities.remove("u1");

        assert_eq!(
            gate.authorize(Some(credential.as_str()), RoleRequirement::Any)
                .await
                .unwrap_err(),
            AuthError::UnknownSubject
        );
    }

    #[tokio::test]
    async fn test_role_requirement() {
        let (gate, _, _) = gate();
        let (reporter, _) = gate.login("u1").await.unwrap();
        let (admin, _) = gate.login("a1").await.unwrap();

        let err = gate
            .authorize(Some(reporter.as_str()), RoleRequirement::ADMINISTRATOR)
            .await
            .unwrap_err();
        assert!(err.is_forbidden());

        assert!(gate
            .authorize(Some(admin.as_str()), RoleRequirement::ADMINISTRATOR)
            .await
            .is_ok());
        assert!(gate
            .authorize(Some(admin.as_str()), RoleRequirement::ADMINISTRATOR_OR_HANDLER)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_current_role_wins_over_credential_role() {
        let (gate, _, identities) = gate();
        let (credential, _) = gate.login("a1").await.unwrap();

        // Demoted after login
        identities.insert(Identity::new("a1", Role::Handler, Some("g7".to_string())).unwrap());

        assert_eq!(
            gate.authorize(Some(credential.as_str()), RoleRequirement::ADMINISTRATOR)
                .await
                .unwrap_err(),
            AuthError::Forbidden
        );
    }
}
