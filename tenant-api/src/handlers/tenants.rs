//! Tenant administration. Authorization is decided by the bearer lane.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use super::{parse_id, write_failure};
use crate::dtos::{
    tenants::{TenantPatch, TenantRequest},
    MessageResponse,
};
use crate::models::Tenant;
use crate::repositories::TenantRepository;
use crate::utils::FormOrJson;
use crate::AppState;

fn not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Tenant não encontrado"))
}

pub async fn list_tenants(State(state): State<AppState>) -> Result<Json<Vec<Tenant>>, AppError> {
    let tenants = state.tenants.list().await.map_err(AppError::DatabaseError)?;
    Ok(Json(tenants))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Tenant>, AppError> {
    let id = parse_id(&id)?;
    load(&state, id).await.map(Json)
}

pub async fn create_tenant(
    State(state): State<AppState>,
    FormOrJson(req): FormOrJson<TenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), AppError> {
    let tenant = req.into_tenant();
    state.tenants.create(&tenant).await.map_err(write_failure)?;
    tracing::info!(tenant_id = %tenant.id, "Tenant created");
    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    FormOrJson(req): FormOrJson<TenantRequest>,
) -> Result<Json<Tenant>, AppError> {
    let id = parse_id(&id)?;
    let mut tenant = load(&state, id).await?;
    req.apply(&mut tenant);
    store(&state, &tenant).await?;
    Ok(Json(tenant))
}

pub async fn patch_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    FormOrJson(patch): FormOrJson<TenantPatch>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;
    let mut tenant = load(&state, id).await?;
    patch.apply(&mut tenant);
    store(&state, &tenant).await?;
    Ok(Json(MessageResponse {
        message: "Tenant updated successfully",
    }))
}

pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;
    if !state
        .tenants
        .delete(id)
        .await
        .map_err(AppError::DatabaseError)?
    {
        return Err(not_found());
    }
    tracing::info!(tenant_id = %id, "Tenant deleted");
    Ok(Json(MessageResponse {
        message: "Tenant deleted successfully",
    }))
}

async fn load(state: &AppState, id: uuid::Uuid) -> Result<Tenant, AppError> {
    state
        .tenants
        .find_by_id(id)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(not_found)
}

async fn store(state: &AppState, tenant: &Tenant) -> Result<(), AppError> {
    // The row can vanish between the read and the write.
    if !state.tenants.update(tenant).await.map_err(write_failure)? {
        return Err(not_found());
    }
    tracing::info!(tenant_id = %tenant.id, "Tenant updated");
    Ok(())
}
