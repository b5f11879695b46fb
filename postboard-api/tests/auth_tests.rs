/// Integration tests for the session endpoints
///
/// Runs the full router over the in-memory store: register, login with the
/// refresh cookie, refresh, logout and `/auth/me`.

mod common;

use axum::http::StatusCode;
use common::{TestContext, PASSWORD};
use postboard_shared::store::CredentialStore;
use serde_json::json;

#[tokio::test]
async fn test_register_first_user_is_admin() {
    let ctx = TestContext::new();

    let first = ctx.register("first@example.com", "First", PASSWORD).await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(first.json["status"], true);
    assert_eq!(first.json["statusCode"], 201);
    assert_eq!(first.json["data"]["email"], "first@example.com");
    assert_eq!(first.json["data"]["role"], "ADMIN");
    assert!(first.json["data"].get("passwordHash").is_none());
    assert!(first.json["data"].get("password_hash").is_none());

    let second = ctx.register("second@example.com", "Second", PASSWORD).await;
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(second.json["data"]["role"], "CUSTOMER");
}

#[tokio::test]
async fn test_register_ignores_requested_role() {
    let ctx = TestContext::new();
    ctx.register("admin@example.com", "Admin", PASSWORD).await;

    let response = ctx
        .post_json(
            "/auth/register",
            json!({
                "email": "sneaky@example.com",
                "name": "Sneaky",
                "password": PASSWORD,
                "role": "ADMIN"
            }),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json["data"]["role"], "CUSTOMER");
}

#[tokio::test]
async fn test_register_duplicate_email_conflicts() {
    let ctx = TestContext::new();
    ctx.register("dup@example.com", "Original", PASSWORD).await;

    let response = ctx.register("dup@example.com", "Imposter", "different-pw").await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json["status"], false);
    assert_eq!(response.message(), "User with this email already exists");

    // Original account untouched
    let user = ctx
        .store
        .find_user_by_email("dup@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.name, "Original");
    assert_eq!(ctx.login("dup@example.com", PASSWORD).await.status, StatusCode::OK);
    assert_eq!(
        ctx.login("dup@example.com", "different-pw").await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_register_validation_details() {
    let ctx = TestContext::new();

    let response = ctx.register("not-an-email", "", "short").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json["error"], "validation_error");
    let fields: Vec<&str> = response.json["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"password"));

    assert!(ctx
        .store
        .find_user_by_email("not-an-email")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_malformed_bodies_get_error_envelope() {
    let ctx = TestContext::new();

    let missing_fields = ctx
        .post_json("/auth/register", json!({ "email": "a@x.com" }), None)
        .await;
    assert_eq!(missing_fields.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing_fields.json["status"], false);
    assert_eq!(missing_fields.json["statusCode"], 400);
    assert_eq!(missing_fields.json["error"], "bad_request");
    assert!(missing_fields.json["timestamp"].is_string());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{\"email\":"))
        .unwrap();
    let truncated = ctx.send(request).await;
    assert_eq!(truncated.status, StatusCode::BAD_REQUEST);
    assert_eq!(truncated.json["statusCode"], 400);

    let unknown_field = ctx
        .post_json(
            "/auth/register",
            json!({
                "email": "a@x.com",
                "name": "A",
                "password": PASSWORD,
                "isAdmin": true
            }),
            None,
        )
        .await;
    assert_eq!(unknown_field.status, StatusCode::BAD_REQUEST);
    assert!(unknown_field.message().contains("isAdmin"));
    assert!(ctx.store.find_user_by_email("a@x.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_login_rejects_bad_credentials_uniformly() {
    let ctx = TestContext::new();
    ctx.register("user@example.com", "User", PASSWORD).await;

    let wrong_password = ctx.login("user@example.com", "wrong-password").await;
    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.message(), "Invalid credentials");
    assert!(wrong_password.set_cookie().is_none());

    let unknown = ctx.login("nobody@example.com", PASSWORD).await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.message(), "Invalid credentials");
}

#[tokio::test]
async fn test_login_sets_refresh_cookie() {
    let ctx = TestContext::new();
    ctx.register("user@example.com", "User", PASSWORD).await;

    let response = ctx.login("user@example.com", PASSWORD).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.json["data"]["accessToken"].is_string());
    assert_eq!(response.json["data"]["user"]["email"], "user@example.com");
    assert!(response.json["data"].get("refreshToken").is_none());

    let cookie = response.set_cookie().unwrap();
    assert!(cookie.starts_with("refreshToken="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(!cookie.contains("Secure"));
}

#[tokio::test]
async fn test_production_cookie_is_secure() {
    let ctx = TestContext::with_env(&[("PRODUCTION", "true")]);
    ctx.register("user@example.com", "User", PASSWORD).await;

    let response = ctx.login("user@example.com", PASSWORD).await;

    assert!(response.set_cookie().unwrap().contains("Secure"));
    assert!(response.headers.get("strict-transport-security").is_some());
}

#[tokio::test]
async fn test_refresh_issues_access_token() {
    let ctx = TestContext::new();
    let session = ctx.signup("user@example.com").await;

    let response = ctx
        .post_with_cookie("/auth/refresh", Some(&session.refresh_cookie))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let token = response.json["data"]["accessToken"].as_str().unwrap();
    let me = ctx.get("/auth/me", Some(token)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["data"]["email"], "user@example.com");

    // Not rotated: the same cookie keeps working
    let again = ctx
        .post_with_cookie("/auth/refresh", Some(&session.refresh_cookie))
        .await;
    assert_eq!(again.status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_failures() {
    let ctx = TestContext::new();

    let missing = ctx.post_with_cookie("/auth/refresh", None).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.message(), "No refresh token provided");

    let garbage = ctx
        .post_with_cookie("/auth/refresh", Some("refreshToken=not.a.jwt"))
        .await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbage.message(), "Invalid or expired refresh token");
}

#[tokio::test]
async fn test_refresh_after_user_deleted() {
    let ctx = TestContext::new();
    let session = ctx.signup("gone@example.com").await;

    ctx.store.delete_user(session.user_id).await.unwrap();

    let response = ctx
        .post_with_cookie("/auth/refresh", Some(&session.refresh_cookie))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.message(), "Invalid or expired refresh token");

    let me = ctx.get("/auth/me", Some(&session.access_token)).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_and_clears_cookie() {
    let ctx = TestContext::new();
    let session = ctx.signup("user@example.com").await;

    let response = ctx
        .post_with_cookie("/auth/logout", Some(&session.refresh_cookie))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let cleared = response.set_cookie().unwrap();
    assert!(cleared.starts_with("refreshToken=;"));
    assert!(cleared.contains("Max-Age=0"));

    let refresh = ctx
        .post_with_cookie("/auth/refresh", Some(&session.refresh_cookie))
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);

    // Already revoked: still succeeds
    let again = ctx
        .post_with_cookie("/auth/logout", Some(&session.refresh_cookie))
        .await;
    assert_eq!(again.status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_without_cookie() {
    let ctx = TestContext::new();

    let response = ctx.post_with_cookie("/auth/logout", None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.message(), "No refresh token provided");
}

#[tokio::test]
async fn test_me_requires_valid_bearer() {
    let ctx = TestContext::new();
    let session = ctx.signup("user@example.com").await;

    let missing = ctx.get("/auth/me", None).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.json["error"], "unauthorized");

    let malformed = ctx.get("/auth/me", Some("garbage")).await;
    assert_eq!(malformed.status, StatusCode::UNAUTHORIZED);

    let expired = ctx
        .get("/auth/me", Some(&ctx.expired_access_token(&session)))
        .await;
    assert_eq!(expired.status, StatusCode::UNAUTHORIZED);

    // A refresh token is not an access token
    let refresh_value = session.refresh_cookie.trim_start_matches("refreshToken=");
    let wrong_kind = ctx.get("/auth/me", Some(refresh_value)).await;
    assert_eq!(wrong_kind.status, StatusCode::UNAUTHORIZED);

    let ok = ctx.get("/auth/me", Some(&session.access_token)).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.json["data"]["id"], session.user_id.to_string());
}

#[tokio::test]
async fn test_refresh_token_cap_evicts_oldest() {
    let ctx = TestContext::new();
    let first = ctx.signup("user@example.com").await;

    let mut cookies = vec![first.refresh_cookie.clone()];
    for _ in 0..5 {
        let login = ctx.login("user@example.com", PASSWORD).await;
        cookies.push(login.refresh_cookie().unwrap());
    }

    let live = ctx.store.list_refresh_tokens(first.user_id).await.unwrap();
    assert_eq!(live.len(), 5);

    let oldest = ctx.post_with_cookie("/auth/refresh", Some(&cookies[0])).await;
    assert_eq!(oldest.status, StatusCode::UNAUTHORIZED);

    for cookie in &cookies[1..] {
        let response = ctx.post_with_cookie("/auth/refresh", Some(cookie)).await;
        assert_eq!(response.status, StatusCode::OK);
    }
}

/// register → login → me (first user is ADMIN) → logout → refresh fails
#[tokio::test]
async fn test_session_lifecycle_scenario() {
    let ctx = TestContext::new();

    let registered = ctx.register("a@x.com", "A", "pw123456").await;
    assert_eq!(registered.status, StatusCode::CREATED);

    let login = ctx.login("a@x.com", "pw123456").await;
    assert_eq!(login.status, StatusCode::OK);
    let access = login.json["data"]["accessToken"].as_str().unwrap().to_string();
    let cookie = login.refresh_cookie().unwrap();

    let me = ctx.get("/auth/me", Some(&access)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["data"]["email"], "a@x.com");
    assert_eq!(me.json["data"]["role"], "ADMIN");
    assert!(me.json["data"]["id"].is_string());

    let logout = ctx.post_with_cookie("/auth/logout", Some(&cookie)).await;
    assert_eq!(logout.status, StatusCode::OK);

    let refresh = ctx.post_with_cookie("/auth/refresh", Some(&cookie)).await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_without_database() {
    let ctx = TestContext::new();

    let response = ctx.get("/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json["data"]["status"], "healthy");
    assert_eq!(response.json["data"]["database"], "not_configured");
    assert_eq!(response.headers.get("x-content-type-options").unwrap(), "nosniff");
}
