//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use common::{FakeRuntime, FakeSource, create_user, deploy_config};
use dockhand::auth::TokenGenerator;
use dockhand::deploy::Orchestrator;
use dockhand::server::{AppState, create_router};
use dockhand::store::{SqliteStore, Store};
use dockhand::types::Token;

struct TestApp {
    _temp_dir: tempfile::TempDir,
    router: Router,
    store: Arc<SqliteStore>,
    admin_token: String,
}

fn issue_token(store: &dyn Store, is_admin: bool, user_id: Option<String>) -> String {
    let issued = TokenGenerator::new().issue().expect("issue token");
    let token = Token {
        id: Uuid::new_v4().to_string(),
        token_hash: issued.hash,
        token_lookup: issued.raw.lookup().to_string(),
        is_admin,
        user_id,
        created_at: Utc::now(),
        expires_at: None,
        last_used_at: None,
    };
    store.create_token(&token).expect("store token");
    issued.raw.to_string()
}

impl TestApp {
    fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("create temp dir");
        let store = Arc::new(SqliteStore::new(temp_dir.path().join("dockhand.db")).expect("open store"));
        store.initialize().expect("initialize store");
        let admin_token = issue_token(store.as_ref(), true, None);

        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(FakeRuntime::default()),
            Arc::new(FakeSource::default()),
            deploy_config(temp_dir.path()),
        );
        let router = create_router(Arc::new(AppState::new(orchestrator)));

        Self {
            _temp_dir: temp_dir,
            router,
            store,
            admin_token,
        }
    }

    fn user_token(&self, username: &str, can_create_sites: bool) -> (String, String) {
        let user = create_user(self.store.as_ref(), username, can_create_sites);
        let token = issue_token(self.store.as_ref(), false, Some(user.id.clone()));
        (user.id, token)
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sites_require_authentication() {
    let app = TestApp::new();
    let (status, body) = app.request(Method::GET, "/api/v1/sites", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");
}

#[tokio::test]
async fn test_create_and_inspect_site() {
    let app = TestApp::new();
    let (_, token) = app.user_token("alice", true);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/sites",
            Some(&token),
            Some(json!({
                "name": "Demo",
                "type": "php",
                "domain": "demo.test",
                "ssl_enabled": true,
                "ssl_config": {
                    "challenge": "dns",
                    "dns_provider": "cloudflare",
                    "credentials": { "CF_DNS_API_TOKEN": "cf-secret" }
                }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    let site = &body["data"];
    assert_eq!(site["status"], "running");
    assert!(site["container_name"].as_str().unwrap().starts_with("php_demo_"));
    assert!(!body.to_string().contains("cf-secret"));
    let id = site["id"].as_i64().unwrap();

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/sites/{id}/status"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/sites/{id}/logs?lines=5"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lines"], 5);

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/sites/{id}/topology"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["content"].as_str().unwrap().contains("services:"));

    let (status, body) = app.request(Method::GET, "/api/v1/sites", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_spec_is_bad_request_and_duplicate_domain_conflicts() {
    let app = TestApp::new();
    let (_, token) = app.user_token("bob", true);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/sites",
            Some(&token),
            Some(json!({ "name": "Bad", "type": "php", "domain": "not a domain" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let spec = json!({ "name": "One", "type": "wordpress", "domain": "dup.test" });
    let (status, _) = app
        .request(Method::POST, "/api/v1/sites", Some(&token), Some(spec.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app
        .request(Method::POST, "/api/v1/sites", Some(&token), Some(spec))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_site_access_follows_grants() {
    let app = TestApp::new();
    let (_, owner_token) = app.user_token("owner", true);
    let (guest_id, guest_token) = app.user_token("guest", false);

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/sites",
            Some(&owner_token),
            Some(json!({ "name": "Shared", "type": "wordpress", "domain": "shared.test" })),
        )
        .await;
    let id = body["data"]["id"].as_i64().unwrap();
    let site_uri = format!("/api/v1/sites/{id}");

    let (status, _) = app.request(Method::GET, &site_uri, Some(&guest_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/users/{guest_id}/site-grants"),
            Some(&app.admin_token),
            Some(json!({ "site_id": id, "allow": ["site:read"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.request(Method::GET, &site_uri, Some(&guest_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::POST, &format!("{site_uri}/stop"), Some(&guest_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(Method::DELETE, &site_uri, Some(&guest_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(Method::DELETE, &format!("{site_uri}?keep_data=true"), Some(&owner_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["keep_data"], true);
    assert_eq!(body["data"]["clean"], true);
}

#[tokio::test]
async fn test_users_without_create_rights_get_forbidden() {
    let app = TestApp::new();
    let (_, token) = app.user_token("reader", false);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/sites",
            Some(&token),
            Some(json!({ "name": "Nope", "type": "php", "domain": "nope.test" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_update_reports_recreation() {
    let app = TestApp::new();
    let (_, token) = app.user_token("carol", true);

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/sites",
            Some(&token),
            Some(json!({ "name": "Edit", "type": "php", "domain": "edit.test" })),
        )
        .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/api/v1/sites/{id}"),
            Some(&token),
            Some(json!({ "include_www": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recreated"], true);
    assert_eq!(body["data"]["include_www"], true);

    let (_, body) = app
        .request(
            Method::PATCH,
            &format!("/api/v1/sites/{id}"),
            Some(&token),
            Some(json!({ "include_www": true })),
        )
        .await;
    assert_eq!(body["data"]["recreated"], false);
}

#[tokio::test]
async fn test_admin_user_and_settings_management() {
    let app = TestApp::new();
    let admin = Some(app.admin_token.as_str());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/admin/users",
            admin,
            Some(json!({ "username": "dave", "can_create_sites": true })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/admin/users",
            admin,
            Some(json!({ "username": "dave" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/users/{user_id}/tokens"),
            admin,
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["token"].as_str().unwrap().starts_with("dockhand_"));

    let (status, body) = app
        .request(
            Method::PUT,
            "/api/v1/admin/settings/default_php_version",
            admin,
            Some(json!({ "value": "8.2" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "8.2");

    let (status, _) = app
        .request(
            Method::PUT,
            "/api/v1/admin/settings/default_php_version",
            admin,
            Some(json!({ "value": "5.6" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::GET, "/api/v1/admin/users", Some("dockhand_00000000_00000000000000000000000000000000"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
