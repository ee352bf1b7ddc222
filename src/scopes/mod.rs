//! Scope naming and parsing
//!
//! A scope is a named broadcast channel of the form `<kind>:<id>`:
//! - `identity:<subject-id>` private channel of one subject
//! - `group:<group-id>` shared by every member of a group
//! - `role:<role-name>` role-wide broadcast (only `role:administrator` is joinable)
//!
//! Ids must match [a-zA-Z0-9_-]+ so a scope string can never smuggle a
//! separator or a second scope.

use crate::auth::Role;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const IDENTITY_PREFIX: &str = "identity";
pub const GROUP_PREFIX: &str = "group";
pub const ROLE_PREFIX: &str = "role";

/// Valid characters for a scope id
fn is_valid_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_valid_id_char)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("scope name cannot be empty")]
    Empty,

    #[error("scope must have the form <kind>:<id>")]
    MissingSeparator,

    #[error("unknown scope kind '{0}'")]
    UnknownKind(String),

    #[error("invalid scope id '{0}': must match [a-zA-Z0-9_-]+")]
    InvalidId(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),
}

/// A validated scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Identity(String),
    Group(String),
    Role(Role),
}

impl Scope {
    /// Private scope of a subject
    pub fn identity(subject_id: impl Into<String>) -> Result<Self, ScopeError> {
        let id = subject_id.into();
        if !is_valid_id(&id) {
            return Err(ScopeError::InvalidId(id));
        }
        Ok(Scope::Identity(id))
    }

    /// Shared scope of a group
    pub fn group(group_id: impl Into<String>) -> Result<Self, ScopeError> {
        let id = group_id.into();
        if !is_valid_id(&id) {
            return Err(ScopeError::InvalidId(id));
        }
        Ok(Scope::Group(id))
    }

    /// The administrators' broadcast scope
    pub fn administrators() -> Self {
        Scope::Role(Role::Administrator)
    }

    /// Parse and validate a scope name
    pub fn parse(name: &str) -> Result<Self, ScopeError> {
        if name.is_empty() {
            return Err(ScopeError::Empty);
        }

        let (kind, id) = name.split_once(':').ok_or(ScopeError::MissingSeparator)?;

        match kind {
            IDENTITY_PREFIX => Self::identity(id),
            GROUP_PREFIX => Self::group(id),
            ROLE_PREFIX => Role::parse(id)
                .map(Scope::Role)
                .ok_or_else(|| ScopeError::UnknownRole(id.to_string())),
            other => Err(ScopeError::UnknownKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Identity(_) => IDENTITY_PREFIX,
            Scope::Group(_) => GROUP_PREFIX,
            Scope::Role(_) => ROLE_PREFIX,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Identity(id) => write!(f, "{}:{}", IDENTITY_PREFIX, id),
            Scope::Group(id) => write!(f, "{}:{}", GROUP_PREFIX, id),
            Scope::Role(role) => write!(f, "{}:{}", ROLE_PREFIX, role),
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::parse(s)
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Scope::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_valid() {
        assert_eq!(
            Scope::parse("identity:u1").unwrap(),
            Scope::Identity("u1".to_string())
        );
        assert_eq!(
            Scope::parse("group:g7").unwrap(),
            Scope::Group("g7".to_string())
        );
        assert_eq!(
            Scope::parse("role:administrator").unwrap(),
            Scope::administrators()
        );
        assert!(Scope::parse("identity:65f0c2a1b3e4d5f6a7b8c9d0").is_ok());
        assert!(Scope::parse("group:ward_12-north").is_ok());
    }

    #[test]
    fn test_scope_parse_invalid() {
        assert_eq!(Scope::parse(""), Err(ScopeError::Empty));
        assert_eq!(Scope::parse("admin_room"), Err(ScopeError::MissingSeparator));
        assert!(matches!(
            Scope::parse("room:lobby"),
            Err(ScopeError::UnknownKind(_))
        ));
        assert!(matches!(
            Scope::parse("identity:"),
            Err(ScopeError::InvalidId(_))
        ));
        assert!(matches!(
            Scope::parse("group:g7:extra"),
            Err(ScopeError::InvalidId(_))
        ));
        assert!(matches!(
            Scope::parse("identity:u1 group:g7"),
            Err(ScopeError::InvalidId(_))
        ));
        assert!(matches!(
            Scope::parse("role:superuser"),
            Err(ScopeError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_scope_display_matches_parse() {
        for name in ["identity:u1", "group:g7", "role:administrator", "role:handler"] {
            assert_eq!(Scope::parse(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_scope_serde_as_string() {
        let scope = Scope::group("g9").unwrap();
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, "\"group:g9\"");

        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);

        assert!(serde_json::from_str::<Scope>("\"nope\"").is_err());
    }
}
