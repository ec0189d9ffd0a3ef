//! Per-request authentication and authorization.
//!
//! A request moves through [`Stage`]s in order and either reaches
//! `Admitted` with a [`SessionContext`] or stops with a [`Rejection`]:
//!
//! ```text
//! Unauthenticated -> TokenExtracted -> TokenValidated -> SessionResolved -> Authorized -> Admitted
//! ```
//!
//! Sessions are read from the cache first. A miss, an unreadable payload or
//! a payload for another principal rebuilds the session from the store and
//! writes it back whole. Cache and store errors reject the request.

use axum::{
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use service_core::error::ErrorBody;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::cache::{SessionCache, SessionKey};
use super::credentials::{CredentialError, CredentialVerifier};
use super::error::{SessionError, INTERNAL_ERROR};
use super::jwt::{subject_id, TokenError, TokenService};
use super::policy::PolicyEvaluator;
use super::session::{materialize_tenant, materialize_user};
use crate::config::SessionConfig;
use crate::models::{SessionContext, TenantSession, UserSession};
use crate::repositories::UserRepository;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unauthenticated,
    TokenExtracted,
    TokenValidated,
    SessionResolved,
    Authorized,
    Admitted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unauthenticated => "unauthenticated",
            Stage::TokenExtracted => "token_extracted",
            Stage::TokenValidated => "token_validated",
            Stage::SessionResolved => "session_resolved",
            Stage::Authorized => "authorized",
            Stage::Admitted => "admitted",
        }
    }
}

/// Which header a protected route reads its credential from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Bearer,
    ApiKey,
}

/// A credential taken from the request headers, not yet checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    ApiKey(String),
}

impl Credential {
    pub fn extract(headers: &HeaderMap, lane: Lane) -> Result<Self, Rejection> {
        let value = match lane {
            Lane::Bearer => headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer ")),
            Lane::ApiKey => headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()),
        }
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(Rejection::NoCredential(lane))?;

        Ok(match lane {
            Lane::Bearer => Credential::Bearer(value.to_string()),
            Lane::ApiKey => Credential::ApiKey(value.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Credential::Bearer(token) => token,
            Credential::ApiKey(key) => key,
        }
    }
}

#[derive(Debug)]
pub enum Rejection {
    NoCredential(Lane),
    InvalidToken(TokenError),
    SessionUnavailable(Lane, SessionError),
    Forbidden,
    MissingOrigin,
}

impl Rejection {
    /// Last stage reached before the request was turned away.
    pub fn stage(&self) -> Stage {
        match self {
            Rejection::NoCredential(_) | Rejection::MissingOrigin => Stage::Unauthenticated,
            Rejection::InvalidToken(_) => Stage::TokenExtracted,
            Rejection::SessionUnavailable(..) => Stage::TokenValidated,
            Rejection::Forbidden => Stage::SessionResolved,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let stage = self.stage().as_str();
        let (status, message) = match &self {
            Rejection::NoCredential(Lane::Bearer) => {
                tracing::warn!(stage, "Missing bearer token");
                (StatusCode::UNAUTHORIZED, "Token não fornecido".to_string())
            }
            Rejection::NoCredential(Lane::ApiKey) => {
                tracing::warn!(stage, "Missing API key");
                (StatusCode::UNAUTHORIZED, "API Key inválida".to_string())
            }
            Rejection::InvalidToken(e) => {
                tracing::warn!(stage, reason = %e, "Token rejected");
                (StatusCode::UNAUTHORIZED, format!("Token inválido: {}", e))
            }
            Rejection::SessionUnavailable(_, e) if e.is_infrastructure() => {
                tracing::error!(stage, error = %e, "Session backend failure");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_string())
            }
            Rejection::SessionUnavailable(lane, e) => {
                tracing::warn!(stage, error = %e, "Session could not be resolved");
                let message = match lane {
                    Lane::Bearer => "Falha ao recuperar informações do usuário",
                    Lane::ApiKey => "Falha ao recuperar informações do Tenant",
                };
                (StatusCode::UNAUTHORIZED, message.to_string())
            }
            Rejection::Forbidden => (
                StatusCode::FORBIDDEN,
                "Acesso negado - permissão insuficiente".to_string(),
            ),
            Rejection::MissingOrigin => {
                tracing::warn!(stage, "Request without origin");
                (StatusCode::UNAUTHORIZED, "Origem não fornecida".to_string())
            }
        };

        (status, Json(ErrorBody::new(message))).into_response()
    }
}

/// Run a backend call under `limit`, turning its error with `unavailable`.
pub(crate) async fn bounded<T, F>(
    what: &'static str,
    limit: Duration,
    fut: F,
    unavailable: fn(anyhow::Error) -> SessionError,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, anyhow::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(unavailable),
        Err(_) => Err(SessionError::Timeout(what)),
    }
}

/// Serialize `session` and write it under `key`.
pub(crate) async fn store_session<T: Serialize>(
    cache: &dyn SessionCache,
    key: &SessionKey,
    session: &T,
    ttl: Duration,
    limit: Duration,
) -> Result<(), SessionError> {
    let payload = serde_json::to_string(session)?;
    bounded(
        "session cache",
        limit,
        cache.put(key, &payload, ttl),
        SessionError::CacheUnavailable,
    )
    .await
}

#[derive(Clone)]
pub struct RequestPipeline {
    tokens: TokenService,
    cache: Arc<dyn SessionCache>,
    users: Arc<dyn UserRepository>,
    verifier: CredentialVerifier,
    policy: PolicyEvaluator,
    api_key_ttl: Duration,
    backend_timeout: Duration,
}

impl RequestPipeline {
    pub fn new(
        tokens: TokenService,
        cache: Arc<dyn SessionCache>,
        users: Arc<dyn UserRepository>,
        verifier: CredentialVerifier,
        policy: PolicyEvaluator,
        session: &SessionConfig,
    ) -> Self {
        Self {
            tokens,
            cache,
            users,
            verifier,
            policy,
            api_key_ttl: session.api_key_ttl(),
            backend_timeout: session.backend_timeout(),
        }
    }

    /// Resolve the user behind `Authorization: Bearer <token>`.
    pub async fn authenticate_bearer(&self, headers: &HeaderMap) -> Result<SessionContext, Rejection> {
        let credential = Credential::extract(headers, Lane::Bearer)?;
        let token = credential.as_str();

        let claims = self
            .tokens
            .validate_access(token)
            .map_err(Rejection::InvalidToken)?;
        let user_id = subject_id(&claims.sub).map_err(Rejection::InvalidToken)?;

        let reject = |e| Rejection::SessionUnavailable(Lane::Bearer, e);
        let key = SessionKey::token(token);

        if let Some(session) = self.cached::<UserSession>(&key).await.map_err(reject)? {
            if session.user.id == user_id {
                tracing::debug!(user_id = %user_id, "Session cache hit");
                return Ok(SessionContext::User(session));
            }
            tracing::warn!(user_id = %user_id, "Cached session belongs to another user, rebuilding");
        }

        let principal = bounded(
            "credential store",
            self.backend_timeout,
            self.users.find_principal_by_id(user_id),
            SessionError::StoreUnavailable,
        )
        .await
        .map_err(reject)?
        .ok_or(SessionError::PrincipalNotFound)
        .map_err(reject)?;

        let session = materialize_user(&principal);
        store_session(
            self.cache.as_ref(),
            &key,
            &session,
            claims.remaining(),
            self.backend_timeout,
        )
        .await
        .map_err(reject)?;

        tracing::info!(user_id = %user_id, "Session rebuilt from store");
        Ok(SessionContext::User(session))
    }

    /// Resolve the tenant behind `X-API-Key` for a caller at `origin`.
    ///
    /// A cached session is only reused when it still allows `origin`;
    /// otherwise the key is checked against the store again.
    pub async fn authenticate_api_key(
        &self,
        headers: &HeaderMap,
        origin: &str,
    ) -> Result<SessionContext, Rejection> {
        let credential = Credential::extract(headers, Lane::ApiKey)?;
        let api_key = credential.as_str();

        let reject = |e| Rejection::SessionUnavailable(Lane::ApiKey, e);
        let key = SessionKey::api_key(api_key);

        if let Some(session) = self.cached::<TenantSession>(&key).await.map_err(reject)? {
            if session.allows_origin(origin) {
                tracing::debug!(tenant_id = %session.tenant.id, "Tenant session cache hit");
                return Ok(SessionContext::Tenant(session));
            }
            tracing::warn!(
                tenant_id = %session.tenant.id,
                origin,
                "Cached tenant session does not allow origin"
            );
        }

        let principal = match self.verifier.authenticate_by_api_key(api_key, origin).await {
            Ok(principal) => principal,
            Err(CredentialError::Unavailable(e)) => return Err(reject(e)),
            Err(_) => return Err(reject(SessionError::PrincipalNotFound)),
        };

        let session = materialize_tenant(&principal);
        store_session(
            self.cache.as_ref(),
            &key,
            &session,
            self.api_key_ttl,
            self.backend_timeout,
        )
        .await
        .map_err(reject)?;

        tracing::info!(tenant_id = %session.tenant.id, "Tenant session built from store");
        Ok(SessionContext::Tenant(session))
    }

    /// Decide whether `ctx` may call `method` on `path`.
    pub fn authorize(&self, ctx: &SessionContext, path: &str, method: &Method) -> Result<(), Rejection> {
        let principal = ctx.principal_id().to_string();
        let allowed = self.policy.check(
            &principal,
            ctx.roles().iter().map(String::as_str),
            path,
            method.as_str(),
        );

        if allowed {
            Ok(())
        } else {
            tracing::warn!(
                principal = %principal,
                kind = ctx.kind(),
                path,
                method = %method,
                "Policy denied request"
            );
            Err(Rejection::Forbidden)
        }
    }

    /// Read and decode a cached session. Unreadable payloads count as a miss.
    async fn cached<T: DeserializeOwned>(&self, key: &SessionKey) -> Result<Option<T>, SessionError> {
        let raw = bounded(
            "session cache",
            self.backend_timeout,
            self.cache.get(key),
            SessionError::CacheUnavailable,
        )
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(key = %key, error = %SessionError::Corrupt(e), "Discarding cached session");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::{InMemoryDirectory, SeedData};
    use crate::services::cache::MockSessionCache;
    use axum::http::HeaderValue;

    struct Harness {
        pipeline: RequestPipeline,
        tokens: TokenService,
        cache: Arc<MockSessionCache>,
        directory: Arc<InMemoryDirectory>,
        seed: SeedData,
    }

    async fn harness() -> Harness {
        let (directory, seed) = InMemoryDirectory::seeded().unwrap();
        let directory = Arc::new(directory);
        let cache = Arc::new(MockSessionCache::new());
        let tokens = TokenService::new(
            b"pipeline-test-secret",
            chrono::Duration::minutes(15),
            chrono::Duration::days(1),
        );
        let policy = PolicyEvaluator::load(directory.as_ref()).await.unwrap();
        let session = SessionConfig {
            api_key_ttl_hours: 24,
            backend_timeout_ms: 100,
            refresh_token_single_use: false,
        };
        let pipeline = RequestPipeline::new(
            tokens.clone(),
            cache.clone(),
            directory.clone(),
            CredentialVerifier::new(directory.clone(), directory.clone(), session.backend_timeout()),
            policy,
            &session,
        );
        Harness {
            pipeline,
            tokens,
            cache,
            directory,
            seed,
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn api_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn credentials_come_from_the_lane_header() {
        assert_eq!(
            Credential::extract(&bearer("abc"), Lane::Bearer).unwrap(),
            Credential::Bearer("abc".into())
        );
        assert!(matches!(
            Credential::extract(&HeaderMap::new(), Lane::Bearer),
            Err(Rejection::NoCredential(Lane::Bearer))
        ));
        assert!(matches!(
            Credential::extract(&bearer(""), Lane::Bearer),
            Err(Rejection::NoCredential(Lane::Bearer))
        ));
        assert!(matches!(
            Credential::extract(&bearer("abc"), Lane::ApiKey),
            Err(Rejection::NoCredential(Lane::ApiKey))
        ));
    }

    #[tokio::test]
    async fn cache_miss_rebuilds_and_repopulates() {
        let h = harness().await;
        let pair = h
            .tokens
            .issue_token_pair(h.seed.master_user_id, &[], &[])
            .unwrap();

        let ctx = h
            .pipeline
            .authenticate_bearer(&bearer(&pair.access_token))
            .await
            .unwrap();
        assert_eq!(ctx.principal_id(), h.seed.master_user_id);
        assert!(ctx.roles().contains("admin"));

        let stored = h.cache.raw(&SessionKey::token(&pair.access_token)).unwrap();
        let stored: UserSession = serde_json::from_str(&stored).unwrap();
        assert_eq!(SessionContext::User(stored), ctx);
    }

    #[tokio::test]
    async fn session_for_another_user_is_not_trusted() {
        let h = harness().await;
        let pair = h
            .tokens
            .issue_token_pair(h.seed.master_user_id, &[], &[])
            .unwrap();

        let coordinator = h
            .directory
            .find_principal_by_id(h.seed.coordinator_user_id)
            .await
            .unwrap()
            .unwrap();
        let planted = serde_json::to_string(&materialize_user(&coordinator)).unwrap();
        h.cache.insert_raw(
            &SessionKey::token(&pair.access_token),
            &planted,
            Duration::from_secs(60),
        );

        let ctx = h
            .pipeline
            .authenticate_bearer(&bearer(&pair.access_token))
            .await
            .unwrap();
        assert_eq!(ctx.principal_id(), h.seed.master_user_id);
    }

    #[tokio::test]
    async fn slow_store_times_out_as_infrastructure_failure() {
        let h = harness().await;
        let pair = h
            .tokens
            .issue_token_pair(h.seed.master_user_id, &[], &[])
            .unwrap();
        h.directory.set_latency(Some(Duration::from_millis(500)));

        let err = h
            .pipeline
            .authenticate_bearer(&bearer(&pair.access_token))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Rejection::SessionUnavailable(Lane::Bearer, SessionError::Timeout(_))
        ));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn deleted_user_cannot_rebuild() {
        let h = harness().await;
        let pair = h
            .tokens
            .issue_token_pair(h.seed.coordinator_user_id, &[], &[])
            .unwrap();
        assert!(h.directory.remove_user(h.seed.coordinator_user_id));

        let err = h
            .pipeline
            .authenticate_bearer(&bearer(&pair.access_token))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cached_api_key_is_rechecked_against_origin() {
        let h = harness().await;
        let headers = api_key(&h.seed.api_key);

        let ctx = h
            .pipeline
            .authenticate_api_key(&headers, "localhost")
            .await
            .unwrap();
        assert_eq!(ctx.principal_id(), h.seed.master_tenant_id);
        assert!(h.cache.raw(&SessionKey::api_key(&h.seed.api_key)).is_some());

        let err = h
            .pipeline
            .authenticate_api_key(&headers, "evil.example")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Rejection::SessionUnavailable(Lane::ApiKey, SessionError::PrincipalNotFound)
        ));
    }

    #[tokio::test]
    async fn authorization_follows_the_policy_table() {
        let h = harness().await;
        let pair = h
            .tokens
            .issue_token_pair(h.seed.coordinator_user_id, &[], &[])
            .unwrap();
        let ctx = h
            .pipeline
            .authenticate_bearer(&bearer(&pair.access_token))
            .await
            .unwrap();

        assert!(h.pipeline.authorize(&ctx, "/api/v1/users", &Method::GET).is_ok());
        assert!(matches!(
            h.pipeline.authorize(&ctx, "/api/v1/tenants", &Method::GET),
            Err(Rejection::Forbidden)
        ));
        assert!(matches!(
            h.pipeline.authorize(&ctx, "/api/v1/users", &Method::DELETE),
            Err(Rejection::Forbidden)
        ));
    }

    #[test]
    fn rejections_record_the_stage_reached() {
        assert_eq!(Rejection::MissingOrigin.stage(), Stage::Unauthenticated);
        assert_eq!(
            Rejection::InvalidToken(TokenError::Expired).stage(),
            Stage::TokenExtracted
        );
        assert_eq!(Rejection::Forbidden.stage(), Stage::SessionResolved);
    }
}
