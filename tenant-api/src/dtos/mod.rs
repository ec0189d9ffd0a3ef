pub mod auth;
pub mod tenants;
pub mod users;

use serde::Serialize;

use crate::models::SessionTenant;

/// Body of `GET /api/v1/auth-apikey/tenant-by-apikey`.
#[derive(Debug, Serialize)]
pub struct TenantByApiKeyResponse {
    pub origin: String,
    pub tenant: SessionTenant,
    pub status: &'static str,
}

/// Confirmation body of partial updates and deletes.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
