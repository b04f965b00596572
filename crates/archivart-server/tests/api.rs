//! End-to-end tests of the HTTP API against an in-memory database

use archivart_server::{
    app, AppState, MatchOutcome, Matcher, MatchingError, ServerConfig, StoredDescriptors,
};
use archivart_store::seed::DEFAULT_ADMIN_EMAIL;
use archivart_store::Database;
use archivart_test_utils::{
    bootstrapped_db, create_role_with, create_user, sample_media, sample_media_with_descriptors,
    user_with_permissions, ADMIN_PASSWORD, TEST_PASSWORD,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;

#[derive(Debug, Default)]
struct StubMatcher {
    healthy: bool,
    outcome: Option<MatchOutcome>,
    compares: AtomicUsize,
}

#[async_trait]
impl Matcher for StubMatcher {
    async fn is_healthy(&self) -> bool {
        self.healthy
    }

    async fn compare(
        &self,
        query_image_path: &Path,
        stored: &[StoredDescriptors],
        _threshold: f64,
    ) -> Result<Option<MatchOutcome>, MatchingError> {
        assert!(query_image_path.exists());
        assert!(!stored.is_empty());
        self.compares.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome)
    }
}

fn state_with(db: Database, config: ServerConfig) -> AppState {
    AppState::new(config, db).unwrap()
}

fn state(db: Database) -> AppState {
    state_with(db, ServerConfig::new())
}

async fn send(
    state: &AppState,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = warp::test::request().method(method).path(path);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.reply(&app(state)).await;
    let status = response.status();
    let body = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (status, body)
}

async fn call(state: &AppState, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    send(state, method, path, None, body).await
}

async fn call_as(
    state: &AppState,
    token: &str,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    send(state, method, path, Some(token), body).await
}

async fn login(state: &AppState, email: &str, password: &str) -> String {
    let (status, body) = call(
        state,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["tokens"]["access_token"].as_str().unwrap().to_string()
}

async fn admin_token(state: &AppState) -> String {
    login(state, DEFAULT_ADMIN_EMAIL, ADMIN_PASSWORD).await
}

#[tokio::test]
async fn test_login_returns_tokens_permissions_and_role() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let (status, body) = call(
        &state,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": DEFAULT_ADMIN_EMAIL, "password": ADMIN_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["tokens"]["token_type"], json!("Bearer"));
    assert_eq!(body["data"]["role"]["name"], json!("super_admin"));
    let permissions = body["data"]["permissions"].as_array().unwrap();
    assert!(permissions.contains(&json!("rbac.delete")));
    assert!(body["data"]["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let (status, body) = call(
        &state,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": DEFAULT_ADMIN_EMAIL, "password": "Wrong123!" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("INVALID_CREDENTIALS"));
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let (db, _) = bootstrapped_db();
    let state = state(db);

    let (status, body) = call(&state, "GET", "/api/auth/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("NO_TOKEN"));

    let (status, body) = call_as(&state, "not.a-token", "GET", "/api/admin/dashboard", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("INVALID_TOKEN"));
}

#[tokio::test]
async fn test_missing_permission_is_forbidden() {
    let (db, _) = bootstrapped_db();
    user_with_permissions(&db, "viewer@example.com", &["media.view"]);
    let state = state(db);
    let token = login(&state, "viewer@example.com", TEST_PASSWORD).await;

    let (status, _) = call_as(&state, &token, "GET", "/api/admin/media", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call_as(&state, &token, "GET", "/api/admin/users", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["required"], json!(["users.view"]));
}

#[tokio::test]
async fn test_user_without_roles_is_denied() {
    let (db, _) = bootstrapped_db();
    create_user(&db, "plain@example.com");
    let state = state(db);
    let token = login(&state, "plain@example.com", TEST_PASSWORD).await;

    let (status, body) = call_as(&state, &token, "GET", "/api/auth/permissions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["permissions"], json!([]));

    let (status, _) = call_as(&state, &token, "GET", "/api/admin/dashboard", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_assignment_applies_without_new_login() {
    let (db, _) = bootstrapped_db();
    let user = create_user(&db, "late@example.com");
    let role = create_role_with(&db, "media_viewer", &["media.view"]);
    let state = state(db);
    let admin = admin_token(&state).await;
    let token = login(&state, "late@example.com", TEST_PASSWORD).await;

    let (status, _) = call_as(&state, &token, "GET", "/api/admin/media", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call_as(
        &state,
        &admin,
        "POST",
        "/api/rbac/users/roles",
        Some(json!({ "user_id": user.id, "role_id": role.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call_as(&state, &token, "GET", "/api/admin/media", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_revokes_access_token() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let token = admin_token(&state).await;

    let (status, _) = call_as(&state, &token, "POST", "/api/auth/logout", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call_as(&state, &token, "GET", "/api/auth/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("TOKEN_REVOKED"));
}

#[tokio::test]
async fn test_later_sign_in_invalidates_earlier_tokens() {
    let (db, admin) = bootstrapped_db();
    let state = state(db);
    let first = admin_token(&state).await;
    let (status, _) = call_as(&state, &first, "GET", "/api/auth/profile", None).await;
    assert_eq!(status, StatusCode::OK);

    // A sign-in stamped in a later second than the first token's issue time
    let later = chrono::Utc::now() + chrono::Duration::seconds(5);
    state.db.users().touch_login(admin.id, later).unwrap();

    let (status, body) = call_as(&state, &first, "GET", "/api/auth/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("TOKEN_INVALIDATED"));
}

#[tokio::test]
async fn test_refresh_rotates_the_refresh_token() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let (_, body) = call(
        &state,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": DEFAULT_ADMIN_EMAIL, "password": ADMIN_PASSWORD })),
    )
    .await;
    let refresh = body["data"]["tokens"]["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = call(
        &state,
        "POST",
        "/api/auth/refresh",
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["access_token"].is_string());

    let (status, body) = call(
        &state,
        "POST",
        "/api/auth/refresh",
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("TOKEN_REVOKED"));
}

#[tokio::test]
async fn test_register_then_duplicate_email_conflicts() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let payload = json!({ "name": "New Person", "email": "new@example.com", "password": TEST_PASSWORD });

    let (status, body) = call(&state, "POST", "/api/auth/register", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user"]["account_type"], json!("user"));

    let (status, _) = call(&state, "POST", "/api/auth/register", Some(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_blocked_account_cannot_sign_in() {
    let (db, _) = bootstrapped_db();
    let user = create_user(&db, "blocked@example.com");
    let state = state(db);
    let admin = admin_token(&state).await;

    let path = format!("/api/admin/users/{}/block", user.id);
    let (status, body) = call_as(&state, &admin, "POST", &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_blocked"], json!(true));

    let (status, body) = call(
        &state,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "blocked@example.com", "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("ACCOUNT_BLOCKED"));
}

#[tokio::test]
async fn test_admin_cannot_delete_or_block_self() {
    let (db, admin) = bootstrapped_db();
    let state = state(db);
    let token = admin_token(&state).await;

    let path = format!("/api/admin/users/{}", admin.id);
    let (status, _) = call_as(&state, &token, "DELETE", &path, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let path = format!("/api/admin/users/{}/block", admin.id);
    let (status, _) = call_as(&state, &token, "POST", &path, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_listing_carries_page_window() {
    let (db, _) = bootstrapped_db();
    for i in 0..3 {
        create_user(&db, &format!("u{i}@example.com"));
    }
    let state = state(db);
    let token = admin_token(&state).await;

    let (status, body) = call_as(&state, &token, "GET", "/api/admin/users?role=user&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["total"], json!(3));
    assert_eq!(body["data"]["pagination"]["has_next"], json!(true));
}

#[tokio::test]
async fn test_module_delete_cascades_through_api() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let token = admin_token(&state).await;

    let (status, body) = call_as(
        &state,
        &token,
        "POST",
        "/api/rbac/modules",
        Some(json!({ "name": "reports", "display_name": "Reports" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let module_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = call_as(
        &state,
        &token,
        "POST",
        "/api/rbac/module-actions",
        Some(json!({ "module_id": module_id, "name": "export", "display_name": "Export" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let action_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = call_as(
        &state,
        &token,
        "POST",
        "/api/rbac/permissions",
        Some(json!({ "display_name": "Reports Export", "module_id": module_id, "action_id": action_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["name"], json!("reports.export"));

    let impact_path = format!("/api/rbac/modules/{module_id}/deletion-impact");
    let (status, body) = call_as(&state, &token, "GET", &impact_path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["actions"], json!(1));
    assert_eq!(body["data"]["permissions"], json!(1));

    let module_path = format!("/api/rbac/modules/{module_id}");
    let (status, _) = call_as(&state, &token, "DELETE", &module_path, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call_as(&state, &token, "GET", &module_path, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = call_as(
        &state,
        &token,
        "GET",
        "/api/rbac/permissions/check-duplicate?name=reports.export",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["exists"], json!(false));
}

#[tokio::test]
async fn test_system_module_cannot_be_deleted() {
    let (db, _) = bootstrapped_db();
    let users = db.modules().get_by_name("users").unwrap().unwrap();
    let state = state(db);
    let token = admin_token(&state).await;

    let path = format!("/api/rbac/modules/{}", users.id);
    let (status, body) = call_as(&state, &token, "DELETE", &path, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_admin_media_upload_hashes_image() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let token = admin_token(&state).await;
    let payload = json!({
        "title": "Mona",
        "scanning_image": "scans/mona.jpg",
        "scanning_image_data": "aGVsbG8=",
        "media_type": "video",
        "file_path": "media/mona.mp4",
        "file_size": 1024,
    });

    let (status, body) = call_as(&state, &token, "POST", "/api/admin/media", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(
        body["data"]["image_hash"],
        json!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
    );

    let mut duplicate = payload;
    duplicate["scanning_image"] = json!("scans/other.jpg");
    let (status, _) = call_as(&state, &token, "POST", "/api/admin/media", Some(duplicate)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_public_media_hides_inactive_items() {
    let (db, _) = bootstrapped_db();
    let shown = db.media().create(&sample_media("shown", b"one")).unwrap();
    let hidden = db.media().create(&sample_media("hidden", b"two")).unwrap();
    db.media().toggle_active(hidden.id).unwrap();
    let state = state(db);

    let (status, body) = call(&state, "GET", "/api/media", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], json!(1));
    assert_eq!(
        body["data"]["items"][0]["file_url"],
        json!("http://localhost:3000/uploads/media/uploads/media/shown.jpg")
    );

    let (status, _) = call(&state, "GET", &format!("/api/media/{}", shown.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&state, "GET", &format!("/api/media/{}", hidden.id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn post_image(state: &AppState, path: &str, image: &'static [u8]) -> (StatusCode, Value) {
    let response = warp::test::request()
        .method("POST")
        .path(path)
        .body(image)
        .reply(&app(state))
        .await;
    let body = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status(), body)
}

#[tokio::test]
async fn test_exact_hash_match_skips_matcher() {
    let (db, _) = bootstrapped_db();
    db.media().create(&sample_media("exact", b"scan-bytes")).unwrap();
    let matcher = Arc::new(StubMatcher::default());
    let state = state(db).with_matcher(matcher.clone());

    let (status, body) = post_image(&state, "/api/media/match", b"scan-bytes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Match found"));
    assert_eq!(body["data"]["match"]["title"], json!("exact"));
    assert_eq!(body["data"]["match"]["similarity"]["score"], json!(1.0));
    assert_eq!(body["data"]["match"]["similarity"]["method"], json!("hash"));
    assert_eq!(matcher.compares.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_match_without_descriptors() {
    let (db, _) = bootstrapped_db();
    db.media().create(&sample_media("plain", b"stored")).unwrap();
    let state = state(db).with_matcher(Arc::new(StubMatcher::default()));

    let (status, body) = post_image(&state, "/api/media/match", b"query").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("No media available for matching"));
    assert_eq!(body["data"]["match"], Value::Null);
}

#[tokio::test]
async fn test_unhealthy_matcher_is_unavailable() {
    let (db, _) = bootstrapped_db();
    db.media()
        .create(&sample_media_with_descriptors("featured", b"stored"))
        .unwrap();
    let state = state(db).with_matcher(Arc::new(StubMatcher::default()));

    let (status, body) = post_image(&state, "/api/media/match", b"query").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body["message"],
        json!("Image processing service is temporarily unavailable. Please try again later.")
    );
}

#[tokio::test]
async fn test_matcher_result_is_labelled() {
    let (db, _) = bootstrapped_db();
    let media = db
        .media()
        .create(&sample_media_with_descriptors("featured", b"stored"))
        .unwrap();
    let matcher = Arc::new(StubMatcher {
        healthy: true,
        outcome: Some(MatchOutcome {
            id: media.id,
            similarity: 0.65,
            match_count: 42,
        }),
        compares: AtomicUsize::new(0),
    });
    let state = state(db).with_matcher(matcher.clone());

    let (status, body) = post_image(&state, "/api/media/match?threshold=30", b"query").await;
    assert_eq!(status, StatusCode::OK);
    let similarity = &body["data"]["match"]["similarity"];
    assert_eq!(similarity["description"], json!("High"));
    assert_eq!(similarity["match_count"], json!(42));
    assert_eq!(similarity["threshold"], json!(30.0));
    assert_eq!(matcher.compares.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_matcher_miss_reports_no_match() {
    let (db, _) = bootstrapped_db();
    db.media()
        .create(&sample_media_with_descriptors("featured", b"stored"))
        .unwrap();
    let matcher = StubMatcher {
        healthy: true,
        ..StubMatcher::default()
    };
    let state = state(db).with_matcher(Arc::new(matcher));

    let (status, body) = post_image(&state, "/api/media/match", b"query").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("No matching media found"));
}

#[tokio::test]
async fn test_empty_match_body_is_bad_request() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let (status, _) = post_image(&state, "/api/media/match", b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_auth_routes_are_rate_limited() {
    let (db, _) = bootstrapped_db();
    let config = ServerConfig::new().with_rate_limit(2, Duration::from_secs(60));
    let state = state_with(db, config);
    let attempt = json!({ "email": "nobody@example.com", "password": "Wrong123!" });

    for _ in 0..2 {
        let (status, _) = call(&state, "POST", "/api/auth/login", Some(attempt.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = call(&state, "POST", "/api/auth/login", Some(attempt)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], json!(false));

    let (status, _) = call(&state, "GET", "/api/auth/check-username?username=free_name", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (db, _) = bootstrapped_db();
    let state = state(db);
    let (status, body) = call(&state, "GET", "/api/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
}
