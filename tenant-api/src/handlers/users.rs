//! User administration, always limited to the caller's own tenant.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::{parse_id, write_failure};
use crate::dtos::{
    users::{CreateUserRequest, UpdateUserRequest, UserPatch},
    MessageResponse,
};
use crate::models::{SessionContext, User};
use crate::repositories::UserRepository;
use crate::utils::{hash_password, FormOrJson, Password};
use crate::AppState;

fn not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Usuário não encontrado"))
}

fn digest(password: String) -> Result<String, AppError> {
    Ok(hash_password(&Password::new(password))?.into_string())
}

pub async fn list_users(
    State(state): State<AppState>,
    ctx: SessionContext,
) -> Result<Json<Vec<User>>, AppError> {
    let users = state
        .users
        .list_by_tenant(ctx.tenant_id())
        .await
        .map_err(AppError::DatabaseError)?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let id = parse_id(&id)?;
    load(&state, ctx.tenant_id(), id).await.map(Json)
}

pub async fn create_user(
    State(state): State<AppState>,
    ctx: SessionContext,
    FormOrJson(req): FormOrJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let mut user = User::new(
        ctx.tenant_id(),
        req.username,
        req.name,
        req.email,
        digest(req.password)?,
    );
    user.thumbnail = req.thumbnail;

    state.users.create(&user).await.map_err(write_failure)?;
    tracing::info!(user_id = %user.id, tenant_id = %user.tenant_id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(id): Path<String>,
    FormOrJson(req): FormOrJson<UpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    let id = parse_id(&id)?;
    let mut user = load(&state, ctx.tenant_id(), id).await?;
    if let Some(password) = req.apply(&mut user) {
        user.password_hash = digest(password)?;
    }
    store(&state, &user).await?;
    Ok(Json(user))
}

pub async fn patch_user(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(id): Path<String>,
    FormOrJson(patch): FormOrJson<UserPatch>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;
    let mut user = load(&state, ctx.tenant_id(), id).await?;
    if let Some(password) = patch.apply(&mut user) {
        user.password_hash = digest(password)?;
    }
    store(&state, &user).await?;
    Ok(Json(MessageResponse {
        message: "User updated successfully",
    }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    ctx: SessionContext,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;
    if !state
        .users
        .delete_in_tenant(ctx.tenant_id(), id)
        .await
        .map_err(AppError::DatabaseError)?
    {
        return Err(not_found());
    }
    tracing::info!(user_id = %id, "User deleted");
    Ok(Json(MessageResponse {
        message: "User deleted successfully",
    }))
}

/// A user of another tenant reads as missing.
async fn load(state: &AppState, tenant_id: Uuid, id: Uuid) -> Result<User, AppError> {
    state
        .users
        .find_in_tenant(tenant_id, id)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(not_found)
}

async fn store(state: &AppState, user: &User) -> Result<(), AppError> {
    if !state.users.update(user).await.map_err(write_failure)? {
        return Err(not_found());
    }
    tracing::info!(user_id = %user.id, "User updated");
    Ok(())
}
