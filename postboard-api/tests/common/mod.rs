//! Common test utilities for integration tests
//!
//! - `TestContext`: router over a fresh `MemoryStore`, no integrations
//! - request helpers returning status, headers and decoded JSON
//! - account helpers (register + login) and subscription seeding
//! - a hand-built `multipart/form-data` body

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use postboard_api::app::{build_router, AppState, Backends};
use postboard_api::config::Config;
use postboard_shared::auth::jwt::{create_token, AccessClaims};
use postboard_shared::auth::password::PasswordParams;
use postboard_shared::billing::stripe::PaymentProvider;
use postboard_shared::models::subscription::{SubscriptionTier, UpsertSubscription};
use postboard_shared::models::user::Role;
use postboard_shared::search::DisabledSearchIndex;
use postboard_shared::storage::DisabledStorage;
use postboard_shared::store::{MemoryStore, SubscriptionStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ACCESS_SECRET: &str = "test-access-secret-that-is-at-least-32-chars";
pub const REFRESH_SECRET: &str = "test-refresh-secret-that-is-at-least-32-chars";
pub const PASSWORD: &str = "pw123456";

/// Test context containing all necessary resources
pub struct TestContext {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub config: Config,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_env(&[])
    }

    /// Context with extra or overridden environment values
    pub fn with_env(overrides: &[(&str, &str)]) -> Self {
        Self::build(overrides, None)
    }

    /// Context with a payment provider behind the billing endpoints
    pub fn with_payments(overrides: &[(&str, &str)], payments: Arc<dyn PaymentProvider>) -> Self {
        Self::build(overrides, Some(payments))
    }

    fn build(overrides: &[(&str, &str)], payments: Option<Arc<dyn PaymentProvider>>) -> Self {
        let mut env: HashMap<String, String> = [
            ("DATABASE_URL", "postgres://unused/postboard_test"),
            ("JWT_SECRET", ACCESS_SECRET),
            ("JWT_REFRESH_SECRET", REFRESH_SECRET),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (key, value) in overrides {
            env.insert(key.to_string(), value.to_string());
        }

        let config = Config::from_lookup(|key| env.get(key).cloned()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let backends = Backends {
            credentials: store.clone(),
            posts: store.clone(),
            subscriptions: store.clone(),
            search: Arc::new(DisabledSearchIndex),
            storage: Arc::new(DisabledStorage),
            payments,
            db: None,
        };

        let state = AppState::new(config.clone(), backends, PasswordParams::light()).unwrap();

        TestContext {
            app: build_router(state),
            store,
            config,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            json,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("DELETE").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// POST with only a `Cookie` header
    pub async fn post_with_cookie(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Sends a multipart form to `uri`
    pub async fn send_form(
        &self,
        method: &str,
        uri: &str,
        form: MultipartForm,
        token: Option<&str>,
    ) -> TestResponse {
        let (content_type, body) = form.finish();
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    pub async fn register(&self, email: &str, name: &str, password: &str) -> TestResponse {
        self.post_json(
            "/auth/register",
            json!({ "email": email, "name": name, "password": password }),
            None,
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.post_json(
            "/auth/login",
            json!({ "email": email, "password": password }),
            None,
        )
        .await
    }

    /// Registers and logs in `email` with [`PASSWORD`]
    pub async fn signup(&self, email: &str) -> Session {
        let registered = self.register(email, "Test User", PASSWORD).await;
        assert_eq!(registered.status, StatusCode::CREATED, "{}", registered.json);

        let login = self.login(email, PASSWORD).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.json);

        Session {
            user_id: login.json["data"]["user"]["id"]
                .as_str()
                .unwrap()
                .parse()
                .unwrap(),
            email: email.to_string(),
            role: serde_json::from_value(login.json["data"]["user"]["role"].clone()).unwrap(),
            access_token: login.json["data"]["accessToken"]
                .as_str()
                .unwrap()
                .to_string(),
            refresh_cookie: login.refresh_cookie().unwrap(),
        }
    }

    /// Gives `user_id` an active subscription
    pub async fn subscribe(&self, user_id: Uuid, post_limit: Option<i32>) {
        self.store
            .upsert_subscription(UpsertSubscription {
                user_id,
                stripe_customer_id: format!("cus_{}", user_id.simple()),
                stripe_subscription_id: format!("sub_{}", user_id.simple()),
                status: "active".to_string(),
                tier: SubscriptionTier::Basic,
                post_limit,
                interval: "month".to_string(),
                current_period_end: Utc::now() + Duration::days(30),
            })
            .await
            .unwrap();
    }

    /// An access token for `session` that expired a minute ago
    pub fn expired_access_token(&self, session: &Session) -> String {
        let claims = AccessClaims::new(
            session.user_id,
            &session.email,
            session.role,
            Duration::minutes(-1),
        );
        create_token(&claims, ACCESS_SECRET).unwrap()
    }
}

/// A signed-in user
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub access_token: String,

    /// `refreshToken=<value>`, ready for a `Cookie` header
    pub refresh_cookie: String,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// The `name=value` pair of the refresh cookie that was set
    pub fn refresh_cookie(&self) -> Option<String> {
        self.set_cookie()
            .and_then(|c| c.split(';').next().map(str::to_string))
    }

    pub fn message(&self) -> &str {
        self.json["message"].as_str().unwrap_or_default()
    }
}

const BOUNDARY: &str = "postboard-test-boundary";

/// Minimal `multipart/form-data` encoder
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        (
            format!("multipart/form-data; boundary={}", BOUNDARY),
            self.body,
        )
    }
}
