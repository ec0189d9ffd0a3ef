pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::repositories::{HealthCheck, PolicyRepository, TenantRepository, UserRepository};
use crate::services::{
    pipeline::API_KEY_HEADER, AuthService, CredentialVerifier, PolicyEvaluator, RequestPipeline,
    SessionCache, TokenService,
};

/// Mount point of every route except `/health`.
pub const API_PREFIX: &str = "/api/v1";

/// Storage the service runs against: Postgres + Redis in production,
/// in-memory implementations in tests.
#[derive(Clone)]
pub struct Backends {
    pub users: Arc<dyn UserRepository>,
    pub tenants: Arc<dyn TenantRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub store: Arc<dyn HealthCheck>,
    pub cache: Arc<dyn SessionCache>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: RequestPipeline,
    pub auth: AuthService,
    pub users: Arc<dyn UserRepository>,
    pub tenants: Arc<dyn TenantRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub policy: PolicyEvaluator,
    pub store: Arc<dyn HealthCheck>,
    pub cache: Arc<dyn SessionCache>,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every component and load the policy table.
    pub async fn new(config: AppConfig, backends: Backends) -> Result<Self, AppError> {
        let Backends {
            users,
            tenants,
            policies,
            store,
            cache,
        } = backends;

        let tokens = TokenService::from_config(&config.jwt);
        let verifier = CredentialVerifier::new(
            users.clone(),
            tenants.clone(),
            config.session.backend_timeout(),
        );
        let policy = PolicyEvaluator::load(policies.as_ref()).await?;

        let pipeline = RequestPipeline::new(
            tokens.clone(),
            cache.clone(),
            users.clone(),
            verifier.clone(),
            policy.clone(),
            &config.session,
        );
        let auth = AuthService::new(verifier, users.clone(), tokens, cache.clone(), &config.session);

        let login_rate_limiter = IpRateLimiter::new(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
            "Muitas tentativas de login. Tente novamente mais tarde.",
        )?;
        let ip_rate_limiter = IpRateLimiter::new(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
            "Muitas requisições. Tente novamente mais tarde.",
        )?;

        Ok(Self {
            config,
            pipeline,
            auth,
            users,
            tenants,
            policies,
            policy,
            store,
            cache,
            login_rate_limiter,
            ip_rate_limiter,
        })
    }

    /// Rebuild the policy table from the store. Sessions are untouched.
    pub async fn reload_policies(&self) -> Result<usize, anyhow::Error> {
        self.policy.reload(self.policies.as_ref()).await
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let session_routes = Router::new()
        .merge(login_route)
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::origin_middleware,
        ));

    let bearer_routes = Router::new()
        .route(
            "/tenants",
            get(handlers::tenants::list_tenants).post(handlers::tenants::create_tenant),
        )
        .route(
            "/tenants/:id",
            get(handlers::tenants::get_tenant)
                .put(handlers::tenants::update_tenant)
                .patch(handlers::tenants::patch_tenant)
                .delete(handlers::tenants::delete_tenant),
        )
        .route(
            "/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/users/:id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .patch(handlers::users::patch_user)
                .delete(handlers::users::delete_user),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::bearer_auth_middleware,
        ));

    // Origin resolution must run before the key lookup: the outer layer goes last.
    let api_key_routes = Router::new()
        .route(
            "/auth-apikey/tenant-by-apikey",
            get(handlers::apikey::tenant_by_api_key),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::api_key_auth_middleware,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::origin_middleware,
        ));

    let api = Router::new()
        .merge(session_routes)
        .merge(bearer_routes)
        .merge(api_key_routes);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest(API_PREFIX, api)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}
