mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::*;
use serde_json::json;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::time::{Duration, Instant};
use tenant_api::services::{AccessTokenClaims, SessionKey, TokenKind, TokenService};
use uuid::Uuid;

#[tokio::test]
async fn master_login_returns_token_envelope() {
    let app = TestApp::new().await;

    let (status, body) = app
        .login(MASTER_EMAIL, MASTER_PASSWORD, Some("http://localhost"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "bearer");
    assert!(!token_of(&body).is_empty());
    assert!(!refresh_token_of(&body).is_empty());
    assert_eq!(body["user"]["id"], app.seed.master_user_id.to_string());
    assert_eq!(body["user"]["email"], MASTER_EMAIL);
    assert_eq!(body["roles"], json!(["admin"]));
    assert!(body["policies"]
        .as_array()
        .unwrap()
        .contains(&json!("/api/v1/tenants:GET")));
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn login_accepts_form_bodies() {
    let app = TestApp::new().await;
    let form = format!(
        "email={}&password={}",
        MASTER_EMAIL.replace('@', "%40"),
        MASTER_PASSWORD
    );

    let (status, body) = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::ORIGIN, "https://localhost:3000")
                .body(Body::from(form))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn wrong_password_and_unknown_user_read_the_same() {
    let app = TestApp::new().await;

    let (status, wrong_password) = app
        .login(MASTER_EMAIL, "not-the-password", Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password, json!({ "error": "Credenciais inválidas" }));

    let (status, unknown) = app
        .login("ghost@domain.local", MASTER_PASSWORD, Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, wrong_password);
}

#[tokio::test]
async fn login_is_scoped_by_origin() {
    let app = TestApp::new().await;

    let (status, body) = app
        .login(MASTER_EMAIL, MASTER_PASSWORD, Some("https://evil.example"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Credenciais inválidas" }));

    // No Origin header falls back to the configured default.
    let (status, _) = app.login(MASTER_EMAIL, MASTER_PASSWORD, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_origin_is_rejected_without_a_default() {
    let mut config = test_config();
    config.security.default_origin = None;
    let app = TestApp::with_config(config).await;

    let (status, body) = app.login(MASTER_EMAIL, MASTER_PASSWORD, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Origem não fornecida" }));
}

#[tokio::test]
async fn malformed_login_body_is_a_validation_error() {
    let app = TestApp::new().await;

    let (status, body) = app.login("not-an-email", "x", Some("localhost")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Parâmetros de entrada inválidos" }));

    let (status, _) = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inactive_tenant_cannot_log_in() {
    let app = TestApp::new().await;
    app.directory
        .set_tenant_status(app.seed.master_tenant_id, "INATIVO");

    let (status, body) = app
        .login(MASTER_EMAIL, MASTER_PASSWORD, Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Credenciais inválidas" }));
}

#[tokio::test]
async fn login_caches_the_session() {
    let app = TestApp::new().await;
    let body = app.login_master().await;

    let raw = app
        .cache
        .raw(&SessionKey::token(&token_of(&body)))
        .expect("session cached at login");
    let cached: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(cached["user"]["id"], app.seed.master_user_id.to_string());
    assert_eq!(cached["roles"], json!(["admin"]));
}

#[tokio::test]
async fn cache_outage_fails_login_closed() {
    let app = TestApp::new().await;
    app.cache.set_unavailable(true);

    let (status, body) = app
        .login(MASTER_EMAIL, MASTER_PASSWORD, Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "error": "Falha ao salvar informações do usuário" })
    );
}

#[tokio::test]
async fn refresh_returns_a_different_access_token() {
    let app = TestApp::new().await;
    let first = app.login_master().await;

    let (status, second) = app.refresh(&refresh_token_of(&first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(token_of(&second), token_of(&first));
    assert_eq!(second["user"]["id"], first["user"]["id"]);

    // The new access token works on a protected route.
    let (status, _) = app
        .get_with_token("/api/v1/tenants", Some(&token_of(&second)))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_rejects_malformed_and_expired_tokens() {
    let app = TestApp::new().await;
    let invalid = json!({ "error": "Token inválido ou expirado" });

    let (status, body) = app.refresh("not.a.token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, invalid);

    let expired_issuer = TokenService::new(
        TEST_SECRET.as_bytes(),
        chrono::Duration::minutes(1),
        chrono::Duration::seconds(-10),
    );
    let pair = expired_issuer
        .issue_token_pair(app.seed.master_user_id, &[], &[])
        .unwrap();
    let (status, body) = app.refresh(&pair.refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, invalid);

    // An access token is not a refresh token.
    let login = app.login_master().await;
    let (status, body) = app.refresh(&token_of(&login)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, invalid);
}

#[tokio::test]
async fn refresh_for_a_deleted_user_is_rejected() {
    let app = TestApp::new().await;
    let login = app.login_coordinator().await;
    assert!(app.directory.remove_user(app.seed.coordinator_user_id));

    let (status, body) = app.refresh(&refresh_token_of(&login)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Usuário não encontrado" }));
}

#[tokio::test]
async fn refresh_tokens_are_reusable_by_default() {
    let app = TestApp::new().await;
    let login = app.login_master().await;
    let refresh = refresh_token_of(&login);

    assert_eq!(app.refresh(&refresh).await.0, StatusCode::OK);
    assert_eq!(app.refresh(&refresh).await.0, StatusCode::OK);
}

#[tokio::test]
async fn single_use_refresh_rejects_replay() {
    let mut config = test_config();
    config.session.refresh_token_single_use = true;
    let app = TestApp::with_config(config).await;
    let login = app.login_master().await;
    let refresh = refresh_token_of(&login);

    let (status, rotated) = app.refresh(&refresh).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.refresh(&refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Token inválido ou expirado" }));

    // The rotated token is still good once.
    assert_eq!(app.refresh(&refresh_token_of(&rotated)).await.0, StatusCode::OK);
}

#[tokio::test]
async fn evicted_session_is_rebuilt_transparently() {
    let app = TestApp::new().await;
    let login = app.login_master().await;
    let token = token_of(&login);
    let key = SessionKey::token(&token);

    let before = app.cache.raw(&key).expect("cached at login");
    assert!(app.cache.remove(&key));

    let (status, _) = app.get_with_token("/api/v1/tenants", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);

    let after = app.cache.raw(&key).expect("repopulated on miss");
    let before: serde_json::Value = serde_json::from_str(&before).unwrap();
    let after: serde_json::Value = serde_json::from_str(&after).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn token_for_unknown_subject_cannot_build_a_session() {
    let app = TestApp::new().await;
    let issuer = TokenService::new(
        TEST_SECRET.as_bytes(),
        chrono::Duration::minutes(5),
        chrono::Duration::days(1),
    );
    let pair = issuer.issue_token_pair(Uuid::new_v4(), &[], &[]).unwrap();

    let (status, body) = app
        .get_with_token("/api/v1/tenants", Some(&pair.access_token))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        json!({ "error": "Falha ao recuperar informações do usuário" })
    );
}

#[tokio::test]
async fn login_is_rate_limited_per_client() {
    let mut config = test_config();
    config.rate_limit.login_attempts = 2;
    let app = TestApp::with_config(config).await;

    let attempt = || {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(
                json!({ "email": MASTER_EMAIL, "password": "wrong" }).to_string(),
            ))
            .unwrap()
    };

    assert_eq!(app.send(attempt()).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.send(attempt()).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.send(attempt()).await.0, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn login_against_a_stalled_store_fails_fast() {
    let mut config = test_config();
    config.session.backend_timeout_ms = 100;
    let app = TestApp::with_config(config).await;
    app.directory.set_latency(Some(Duration::from_secs(2)));

    let started = Instant::now();
    let (status, body) = app
        .login(MASTER_EMAIL, MASTER_PASSWORD, Some("http://localhost"))
        .await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Erro interno do servidor" }));

    app.directory.set_latency(None);
    let (status, _) = app
        .login(MASTER_EMAIL, MASTER_PASSWORD, Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn access_token_is_rejected_at_its_expiry_second() {
    let app = TestApp::new().await;
    let now = chrono::Utc::now().timestamp();
    let claims = AccessTokenClaims {
        sub: app.seed.master_user_id.to_string(),
        typ: TokenKind::Access,
        roles: vec!["admin".to_string()],
        policies: vec![],
        jti: Uuid::new_v4().to_string(),
        iat: now - 60,
        exp: now,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap();

    let (status, body) = app.get_with_token("/api/v1/tenants", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Token inválido: token is expired" }));
    assert!(app.cache.raw(&SessionKey::token(&token)).is_none());
}

#[tokio::test]
async fn api_key_sessions_live_for_the_configured_hours() {
    let mut config = test_config();
    config.session.api_key_ttl_hours = 6;
    let app = TestApp::with_config(config).await;

    let (status, _) = app
        .get_with_api_key(
            "/api/v1/auth-apikey/tenant-by-apikey",
            Some(&app.seed.api_key),
            Some("http://localhost"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let ttl = app
        .cache
        .time_to_live(&SessionKey::api_key(&app.seed.api_key))
        .expect("tenant session cached");
    let configured = Duration::from_secs(6 * 3600);
    assert!(ttl <= configured);
    assert!(ttl > configured - Duration::from_secs(5));
}
