//! Roles, identities, and scope entitlements

use crate::scopes::{Scope, ScopeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of actor roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Files work items and follows their progress
    Reporter,
    /// Works on items assigned within their group
    Handler,
    /// Sees and manages everything
    Administrator,
}

impl Role {
    /// Parse a role name. The legacy account names (citizen, officer, admin)
    /// are accepted as aliases.
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "reporter" | "citizen" => Some(Role::Reporter),
            "handler" | "officer" => Some(Role::Handler),
            "administrator" | "admin" => Some(Role::Administrator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reporter => "reporter",
            Role::Handler => "handler",
            Role::Administrator => "administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role predicate applied by the authorization gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleRequirement {
    /// Any authenticated identity
    Any,
    /// Exactly this role
    Only(Role),
    /// Any of these roles
    OneOf(&'static [Role]),
}

impl RoleRequirement {
    pub const ADMINISTRATOR: RoleRequirement = RoleRequirement::Only(Role::Administrator);
    pub const HANDLER: RoleRequirement = RoleRequirement::Only(Role::Handler);
    pub const REPORTER: RoleRequirement = RoleRequirement::Only(Role::Reporter);
    pub const ADMINISTRATOR_OR_HANDLER: RoleRequirement =
        RoleRequirement::OneOf(&[Role::Administrator, Role::Handler]);

    pub fn is_satisfied_by(&self, role: Role) -> bool {
        match self {
            RoleRequirement::Any => true,
            RoleRequirement::Only(required) => *required == role,
            RoleRequirement::OneOf(roles) => roles.contains(&role),
        }
    }
}

/// An authenticated actor as loaded from the account store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    subject_id: String,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
}

impl Identity {
    /// Build an identity. Subject and group ids must be valid scope ids so
    /// the identity's own scopes can always be formed.
    pub fn new(
        subject_id: impl Into<String>,
        role: Role,
        group_id: Option<String>,
    ) -> Result<Self, ScopeError> {
        let subject_id = subject_id.into();
        Scope::identity(subject_id.as_str())?;
        if let Some(group) = &group_id {
            Scope::group(group.as_str())?;
        }

        Ok(Self {
            subject_id,
            role,
            group_id,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }

    /// The private scope of this identity
    pub fn identity_scope(&self) -> Scope {
        Scope::Identity(self.subject_id.clone())
    }

    /// Check whether this identity may subscribe to `scope`
    pub fn can_join(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Identity(id) => *id == self.subject_id,
            Scope::Group(id) => self.group_id.as_deref() == Some(id.as_str()),
            Scope::Role(role) => *role == Role::Administrator && self.is_administrator(),
        }
    }

    /// Every scope this identity is entitled to
    pub fn entitled_scopes(&self) -> Vec<Scope> {
        let mut scopes = vec![self.identity_scope()];
        if let Some(group) = &self.group_id {
            scopes.push(Scope::Group(group.clone()));
        }
        if self.is_administrator() {
            scopes.push(Scope::administrators());
        }
        scopes
    }
}
