//! Identity data model.
//!
//! Every authenticated principal — human or machine — resolves to exactly
//! one [`Subject`]. Users and clients carry their own records keyed to the
//! same id as their companion subject, so deleting the subject revokes
//! access even while an unexpired token is still in the wild.

use lodestar_core::types::now_millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of principal a subject represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Service,
    Node,
    Component,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Service => "service",
            SubjectKind::Node => "node",
            SubjectKind::Component => "component",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The polymorphic identity unit permissions are checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subject {
    pub fn new(id: impl Into<String>, kind: SubjectKind, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            roles: Vec::new(),
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// Account status of an interactive user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
    Locked,
}

/// An interactive user. `id` equals the id of its companion [`Subject`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub last_login_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Password record keyed by username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    pub password_hash: String,
    pub updated_at: i64,
}

/// Machine-client secret record. `client_id` equals the companion subject id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredential {
    pub client_id: String,
    pub secret_hash: String,
    pub subject_kind: SubjectKind,
    pub updated_at: i64,
}

/// A `(resource, action)` grant; either side admits `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub const WILDCARD: &'static str = "*";

    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// The all-access grant `{*, *}`.
    pub fn any() -> Self {
        Self::new(Self::WILDCARD, Self::WILDCARD)
    }

    pub fn allows(&self, resource: &str, action: &str) -> bool {
        (self.resource == Self::WILDCARD || self.resource == resource)
            && (self.action == Self::WILDCARD || self.action == action)
    }
}

/// First-match-wins evaluation over an ordered permission list.
pub fn permitted(permissions: &[Permission], resource: &str, action: &str) -> bool {
    permissions.iter().any(|p| p.allows(resource, action))
}

/// A named, ordered bundle of permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// PEM certificate bundle persisted for one cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCertificate {
    pub node_id: String,
    pub certificate_pem: String,
    pub created_at: i64,
}
