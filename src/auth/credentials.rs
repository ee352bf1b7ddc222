//! Session credentials
//!
//! A credential is stateless and self-contained:
//! `sess-<base64url(claims json)>.<base64url(hmac-sha256)>`
//!
//! It cannot be deleted once handed out, which is why logout goes through
//! the revocation ledger instead.

use crate::auth::identity::Role;
use crate::clock::{Clock, SystemClock};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const SESSION_TOKEN_PREFIX: &str = "sess-";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error("invalid credential signature")]
    InvalidSignature,

    #[error("credential expired")]
    Expired,

    #[error("credential encoding failed: {0}")]
    Encoding(String),
}

/// Secret used to sign credentials
#[derive(Clone)]
pub struct SigningSecret {
    key: Vec<u8>,
}

impl SigningSecret {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("WARDBUS_SECRET")
            .ok()
            .map(|s| Self::new(s.into_bytes()))
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size")
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningSecret([REDACTED])")
    }
}

/// Claims carried inside a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id
    pub sub: String,
    pub role: Role,
    /// Issued at (unix seconds)
    pub iat: u64,
    /// Expiry (unix seconds); the credential is invalid from this instant on
    pub exp: u64,
    /// Random nonce so two credentials are never equal
    pub jti: String,
}

/// A signed session credential
#[derive(Debug, Clone)]
pub struct Credential {
    token: String,
    claims: Claims,
}

impl Credential {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn role(&self) -> Role {
        self.claims.role
    }

    pub fn issued_at(&self) -> u64 {
        self.claims.iat
    }

    pub fn expires_at(&self) -> u64 {
        self.claims.exp
    }

    pub fn into_token(self) -> String {
        self.token
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// Signs and verifies session credentials
#[derive(Clone)]
pub struct CredentialCodec {
    secret: SigningSecret,
    clock: Arc<dyn Clock>,
}

impl CredentialCodec {
    pub fn new(secret: SigningSecret, clock: Arc<dyn Clock>) -> Self {
        Self { secret, clock }
    }

    pub fn with_system_clock(secret: SigningSecret) -> Self {
        Self::new(secret, Arc::new(SystemClock))
    }

    /// Issue a credential valid for `ttl` from now
    pub fn issue(&self, subject_id: &str, role: Role, ttl: Duration) -> Result<Credential, CredentialError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject_id.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(ttl.as_secs()),
            jti: generate_nonce(),
        };

        let claims_json =
            serde_json::to_vec(&claims).map_err(|e| CredentialError::Encoding(e.to_string()))?;
        let claims_b64 = URL_SAFE_NO_PAD.encode(&claims_json);

        let mut mac = self.secret.mac();
        mac.update(claims_b64.as_bytes());
        let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        let token = format!("{}{}.{}", SESSION_TOKEN_PREFIX, claims_b64, signature_b64);

        Ok(Credential { token, claims })
    }

    /// Verify signature and expiry of a token
    pub fn verify(&self, token: &str) -> Result<Credential, CredentialError> {
        let credential = self.verify_signature(token)?;

        if self.clock.now() >= credential.claims.exp {
            return Err(CredentialError::Expired);
        }

        Ok(credential)
    }

    /// Verify the signature only; expiry is not checked
    fn verify_signature(&self, token: &str) -> Result<Credential, CredentialError> {
        let content = token.strip_prefix(SESSION_TOKEN_PREFIX).ok_or_else(|| {
            CredentialError::Malformed(format!(
                "expected prefix '{}'",
                SESSION_TOKEN_PREFIX
            ))
        })?;

        let (claims_b64, signature_b64) = content
            .split_once('.')
            .ok_or_else(|| CredentialError::Malformed("missing signature".to_string()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        // Constant-time comparison
        let mut mac = self.secret.mac();
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CredentialError::InvalidSignature)?;

        let claims_json = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        let claims: Claims = serde_json::from_slice(&claims_json)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        Ok(Credential {
            token: token.to_string(),
            claims,
        })
    }
}

fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
