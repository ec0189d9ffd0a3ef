//! Shared setup for router-level tests: seeded in-memory directory, mock
//! session cache, the real router.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use secrecy::Secret;
use serde_json::Value;
use std::sync::Arc;
use tenant_api::{
    build_router,
    config::{
        AppConfig, DatabaseConfig, Environment, JwtConfig, RateLimitConfig, RedisConfig,
        SecurityConfig, SessionConfig,
    },
    repositories::memory::{InMemoryDirectory, SeedData},
    services::MockSessionCache,
    AppState, Backends,
};
use tower::util::ServiceExt;

pub use tenant_api::repositories::memory::{
    COORDINATOR_EMAIL, COORDINATOR_PASSWORD, MASTER_EMAIL, MASTER_PASSWORD,
};

pub const TEST_SECRET: &str = "integration-test-secret-with-enough-bytes";

pub fn test_config() -> AppConfig {
    AppConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "tenant-api-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
            run_migrations: false,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            secret: Secret::new(TEST_SECRET.to_string()),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 90,
        },
        session: SessionConfig {
            api_key_ttl_hours: 24,
            backend_timeout_ms: 1000,
            refresh_token_single_use: false,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            default_origin: Some("localhost".to_string()),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub directory: Arc<InMemoryDirectory>,
    pub cache: Arc<MockSessionCache>,
    pub seed: SeedData,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let (directory, seed) = InMemoryDirectory::seeded().expect("seed directory");
        let directory = Arc::new(directory);
        let cache = Arc::new(MockSessionCache::new());

        let state = AppState::new(
            config,
            Backends {
                users: directory.clone(),
                tenants: directory.clone(),
                policies: directory.clone(),
                store: directory.clone(),
                cache: cache.clone(),
            },
        )
        .await
        .expect("app state");

        Self {
            router: build_router(state.clone()),
            state,
            directory,
            cache,
            seed,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn login(&self, email: &str, password: &str, origin: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        let body = serde_json::json!({ "email": email, "password": password });
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Log in as the seeded master user and return its token envelope.
    pub async fn login_master(&self) -> Value {
        let (status, body) = self
            .login(MASTER_EMAIL, MASTER_PASSWORD, Some("http://localhost"))
            .await;
        assert_eq!(status, StatusCode::OK, "master login failed: {body}");
        body
    }

    pub async fn login_coordinator(&self) -> Value {
        let (status, body) = self
            .login(COORDINATOR_EMAIL, COORDINATOR_PASSWORD, Some("http://localhost"))
            .await;
        assert_eq!(status, StatusCode::OK, "coordinator login failed: {body}");
        body
    }

    pub async fn refresh(&self, refresh_token: &str) -> (StatusCode, Value) {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/refresh")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get_with_token(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Authenticated request with a JSON body, for the write routes.
    pub async fn send_with_token(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    pub async fn get_with_api_key(
        &self,
        path: &str,
        api_key: Option<&str>,
        origin: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

pub fn token_of(body: &Value) -> String {
    body["token"].as_str().expect("token").to_string()
}

pub fn refresh_token_of(body: &Value) -> String {
    body["refreshToken"].as_str().expect("refreshToken").to_string()
}
