use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::OwnerId;

/// Roles recognized by the storage engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Authenticated identity handed to the engine by the routing layer.
///
/// Session issuance and token validation happen upstream; the engine only
/// trusts the id and role it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: OwnerId,
    pub role: Role,
}

impl Caller {
    /// Create a caller with the plain user role.
    pub fn user(id: OwnerId) -> Self {
        Self {
            id,
            role: Role::User,
        }
    }

    /// Create a caller with the admin role.
    pub fn admin(id: OwnerId) -> Self {
        Self {
            id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this caller may mutate or remove a file owned by `owner`.
    pub fn can_manage(&self, owner: OwnerId) -> bool {
        self.id == owner || self.is_admin()
    }
}
