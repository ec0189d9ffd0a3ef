//! Cache-resident session records and the request-scoped session context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub thumbnail: Option<String>,
}

/// Flattened view of a user: stored under `token:<access token>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub user: SessionUser,
    pub roles: BTreeSet<String>,
    pub policies: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTenant {
    pub id: Uuid,
    pub name: String,
    pub cpf_cnpj: Option<String>,
    pub email: Option<String>,
}

/// Flattened view of a tenant: stored under `apiKey:<key>`.
///
/// Carries the tenant's allowed origins so a cache hit can be re-checked
/// against the caller's origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSession {
    pub tenant: SessionTenant,
    pub allowed_origins: Vec<String>,
    pub roles: BTreeSet<String>,
    pub policies: BTreeSet<String>,
}

impl TenantSession {
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

/// The authenticated principal attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionContext {
    User(UserSession),
    Tenant(TenantSession),
}

impl SessionContext {
    /// Identifier the policy table knows this principal by.
    pub fn principal_id(&self) -> Uuid {
        match self {
            SessionContext::User(s) => s.user.id,
            SessionContext::Tenant(s) => s.tenant.id,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            SessionContext::User(s) => s.user.tenant_id,
            SessionContext::Tenant(s) => s.tenant.id,
        }
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        match self {
            SessionContext::User(s) => &s.roles,
            SessionContext::Tenant(s) => &s.roles,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionContext::User(_) => "user",
            SessionContext::Tenant(_) => "tenant",
        }
    }
}
