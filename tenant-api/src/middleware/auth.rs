use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::origin::ClientOrigin;
use crate::models::SessionContext;
use crate::services::{Lane, Rejection, Stage};
use crate::AppState;

/// Bearer lane: resolve the user session, check policy, attach the context.
pub async fn bearer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = match state.pipeline.authenticate_bearer(req.headers()).await {
        Ok(ctx) => ctx,
        Err(rejection) => return rejection.into_response(),
    };

    if let Err(rejection) = state
        .pipeline
        .authorize(&ctx, request_path(&req), req.method())
    {
        return rejection.into_response();
    }

    admit(&ctx, &req);
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// API-key lane. Runs after the origin middleware.
pub async fn api_key_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(ClientOrigin(origin)) = req.extensions().get::<ClientOrigin>().cloned() else {
        return Rejection::MissingOrigin.into_response();
    };

    let ctx = match state
        .pipeline
        .authenticate_api_key(req.headers(), &origin)
        .await
    {
        Ok(ctx) => ctx,
        Err(rejection) => return rejection.into_response(),
    };

    if let Err(rejection) = state
        .pipeline
        .authorize(&ctx, request_path(&req), req.method())
    {
        return rejection.into_response();
    }

    admit(&ctx, &req);
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Path as the client sent it. Nesting strips the mount prefix from
/// `req.uri()`, and policies are written against the full path.
fn request_path(req: &Request) -> &str {
    req.extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path())
        .unwrap_or_else(|| req.uri().path())
}

fn admit(ctx: &SessionContext, req: &Request) {
    tracing::debug!(
        stage = Stage::Admitted.as_str(),
        principal = %ctx.principal_id(),
        tenant_id = %ctx.tenant_id(),
        kind = ctx.kind(),
        path = %request_path(req),
        "Request admitted"
    );
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .ok_or(Rejection::NoCredential(Lane::Bearer))
    }
}
