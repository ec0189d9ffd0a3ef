use axum::Json;

use crate::dtos::TenantByApiKeyResponse;
use crate::middleware::ClientOrigin;
use crate::models::SessionContext;
use crate::services::{Lane, Rejection};

/// The tenant resolved from `X-API-Key` for the calling origin.
pub async fn tenant_by_api_key(
    ClientOrigin(origin): ClientOrigin,
    ctx: SessionContext,
) -> Result<Json<TenantByApiKeyResponse>, Rejection> {
    match ctx {
        SessionContext::Tenant(session) => Ok(Json(TenantByApiKeyResponse {
            origin,
            tenant: session.tenant,
            status: "success",
        })),
        SessionContext::User(_) => Err(Rejection::NoCredential(Lane::ApiKey)),
    }
}
