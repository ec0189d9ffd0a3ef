use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::role::{PolicyGrant, Role};
use super::tenant::Tenant;

/// User entity. Always owned by exactly one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        tenant_id: Uuid,
        username: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        password_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            username: username.into(),
            name: name.into(),
            email: email.into(),
            password_hash,
            thumbnail: None,
            created_at: Utc::now(),
        }
    }
}

/// A user with its tenant, roles (and their grants) and direct grants,
/// loaded as one unit.
#[derive(Debug, Clone)]
pub struct UserPrincipal {
    pub user: User,
    pub tenant: Tenant,
    pub roles: Vec<Role>,
    pub direct_grants: Vec<PolicyGrant>,
}
