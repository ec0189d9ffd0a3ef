//! Per-entity persistence interfaces.
//!
//! Each trait is implemented by [`postgres::PgDirectory`] for production and
//! [`memory::InMemoryDirectory`] for tests and infrastructure-free local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PolicyRule, Tenant, TenantPrincipal, User, UserPrincipal};

pub use memory::InMemoryDirectory;
pub use postgres::PgDirectory;

/// Failure of an insert or update.
#[derive(Debug, Error)]
pub enum WriteError {
    /// A unique constraint rejected the row.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Liveness of the backing store.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Active-tenant user with this email whose tenant allows `origin`.
    async fn find_for_login(
        &self,
        email: &str,
        origin: &str,
    ) -> Result<Option<UserPrincipal>, anyhow::Error>;

    /// Rebuild a principal by id, without any origin constraint.
    async fn find_principal_by_id(&self, id: Uuid)
        -> Result<Option<UserPrincipal>, anyhow::Error>;

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, anyhow::Error>;

    async fn find_in_tenant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<User>, anyhow::Error>;

    /// Email is unique per tenant.
    async fn create(&self, user: &User) -> Result<(), WriteError>;

    /// Overwrite the row matching `user.id` within `user.tenant_id`.
    /// Returns `false` when there is no such row.
    async fn update(&self, user: &User) -> Result<bool, WriteError>;

    async fn delete_in_tenant(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Active tenant holding exactly this key and allowing `origin`.
    async fn find_by_api_key(
        &self,
        api_key: &str,
        origin: &str,
    ) -> Result<Option<TenantPrincipal>, anyhow::Error>;

    async fn list(&self) -> Result<Vec<Tenant>, anyhow::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, anyhow::Error>;

    async fn create(&self, tenant: &Tenant) -> Result<(), WriteError>;

    /// Overwrite every column but the id, API key and creation time.
    async fn update(&self, tenant: &Tenant) -> Result<bool, WriteError>;

    /// Removes the tenant's users with it.
    async fn delete(&self, id: Uuid) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Every `(subject, object, action)` row of the policy table.
    async fn load_rules(&self) -> Result<Vec<PolicyRule>, anyhow::Error>;
}
