mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use tenant_api::models::PolicyGrant;
use tenant_api::services::SessionKey;

const LOOKUP: &str = "/api/v1/auth-apikey/tenant-by-apikey";

#[tokio::test]
async fn valid_key_from_allowed_origin_returns_the_tenant() {
    let app = TestApp::new().await;

    let (status, body) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("http://localhost:3000"))
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["origin"], "localhost:3000");
    assert_eq!(body["tenant"]["id"], app.seed.master_tenant_id.to_string());
    assert_eq!(body["tenant"]["name"], "Master");
    assert!(app.cache.raw(&SessionKey::api_key(&app.seed.api_key)).is_some());
}

#[tokio::test]
async fn missing_key_is_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app
        .get_with_api_key(LOOKUP, None, Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "API Key inválida" }));
}

#[tokio::test]
async fn unknown_key_or_foreign_origin_cannot_resolve_a_tenant() {
    let app = TestApp::new().await;
    let expected = json!({ "error": "Falha ao recuperar informações do Tenant" });

    let (status, body) = app
        .get_with_api_key(LOOKUP, Some("no-such-key"), Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, expected);

    let (status, body) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("https://evil.example"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, expected);
}

#[tokio::test]
async fn cached_key_cannot_be_replayed_from_a_foreign_origin() {
    let app = TestApp::new().await;

    let (status, _) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("http://evil.example"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        json!({ "error": "Falha ao recuperar informações do Tenant" })
    );
}

#[tokio::test]
async fn tenant_without_the_grant_is_forbidden() {
    let app = TestApp::new().await;
    // Replace the tenant's direct grant with an unrelated one.
    let rules_before = app.state.policy.rule_count();
    app.state
        .policy
        .replace_rules(&[tenant_api::services::PolicyRule::new(
            app.seed.master_tenant_id.to_string(),
            "/something-else",
            "GET",
        )]);
    assert!(rules_before > 1);

    let (status, body) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({ "error": "Acesso negado - permissão insuficiente" })
    );

    // Reloading from the store restores the seeded grant.
    app.state.reload_policies().await.unwrap();
    let (status, _) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn role_granted_to_a_tenant_authorizes_it() {
    let app = TestApp::new().await;
    app.directory.upsert_role(tenant_api::models::Role::new(
        "integration",
        vec![PolicyGrant::new("/api/v1/auth-apikey/*", "GET")],
    ));
    app.directory
        .assign_tenant_role(app.seed.master_tenant_id, "integration");
    // Only the role rule remains, so the tenant's direct grant cannot be what admits it.
    app.state
        .policy
        .replace_rules(&[tenant_api::services::PolicyRule::new(
            "integration",
            "/api/v1/auth-apikey/*",
            "GET",
        )]);

    let (status, _) = app
        .get_with_api_key(LOOKUP, Some(&app.seed.api_key), Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn api_keys_do_not_open_bearer_routes() {
    let app = TestApp::new().await;

    let (status, body) = app
        .get_with_api_key("/api/v1/tenants", Some(&app.seed.api_key), Some("http://localhost"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Token não fornecido" }));
}
