use axum::{extract::State, Json};
use serde_json::{json, Value};
use service_core::error::AppError;
use std::future::Future;
use std::time::Duration;

use crate::AppState;

/// Liveness of the store and the session cache. Either one down, or silent
/// past the backend timeout, answers 503.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let limit = state.config.session.backend_timeout();
    check("store", limit, state.store.health_check()).await?;
    check("cache", limit, state.cache.health_check()).await?;

    Ok(Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "cache": "up"
        }
    })))
}

async fn check(
    component: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<(), anyhow::Error>>,
) -> Result<(), AppError> {
    let outcome = match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(anyhow::anyhow!("no answer within {:?}", limit)),
    };
    outcome.map_err(|e| {
        tracing::error!(component, error = %e, "Health check failed");
        AppError::ServiceUnavailable(format!("{component}: {e}"))
    })
}
