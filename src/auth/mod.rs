//! Authentication and authorization module
//!
//! JWT bearer authentication. The token subject is the acting principal
//! written to `audit_actor`; the role decides who may record, view and attach.

mod jwt;
mod middleware;

pub use jwt::{create_token, decode_token, Claims, ACCESS_TOKEN_EXPIRATION_MINUTES};
pub use middleware::{auth_middleware, require_role};

use serde::{Deserialize, Serialize};

/// Roles for audit access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can capture writes
    #[default]
    Recorder,
    /// Can view decrypted audit trails
    Auditor,
    /// Everything, plus attaching tables
    Admin,
}

impl Role {
    pub fn can_record(&self) -> bool {
        matches!(self, Role::Recorder | Role::Admin)
    }

    pub fn can_view(&self) -> bool {
        matches!(self, Role::Auditor | Role::Admin)
    }

    pub fn can_attach(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Recorder => write!(f, "recorder"),
            Role::Auditor => write!(f, "auditor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}
