//! Caller origin resolution for the login and API-key lanes.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::services::Rejection;
use crate::AppState;

/// Scheme-stripped origin of the calling client, e.g. `localhost:3000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

/// Drop a leading `http://` or `https://`. Nothing else is rewritten.
pub fn normalize_origin(origin: &str) -> &str {
    let origin = origin.trim();
    origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .unwrap_or(origin)
}

/// Origin from the `Origin` header, else `default`.
pub fn resolve_origin(headers: &HeaderMap, default: Option<&str>) -> Option<ClientOrigin> {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(normalize_origin)
        .filter(|o| !o.is_empty())
        .or(default)
        .map(|o| ClientOrigin(o.to_string()))
}

pub async fn origin_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let default = state.config.security.default_origin.as_deref();
    match resolve_origin(req.headers(), default) {
        Some(origin) => {
            req.extensions_mut().insert(origin);
            next.run(req).await
        }
        None => Rejection::MissingOrigin.into_response(),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientOrigin>()
            .cloned()
            .ok_or(Rejection::MissingOrigin)
    }
}
