//! Login and refresh. Neither route needs a token; login is scoped by origin.

use axum::{extract::State, Json};

use crate::dtos::auth::{LoginRequest, LoginResponse, RefreshRequest};
use crate::middleware::ClientOrigin;
use crate::services::ServiceError;
use crate::utils::{FormOrJson, Password};
use crate::AppState;

pub async fn login(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    FormOrJson(req): FormOrJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ServiceError> {
    let password = Password::new(req.password);
    let response = state.auth.login(&req.email, &password, &origin).await?;
    Ok(Json(response))
}

pub async fn refresh(
    State(state): State<AppState>,
    FormOrJson(req): FormOrJson<RefreshRequest>,
) -> Result<Json<LoginResponse>, ServiceError> {
    let response = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(response))
}
