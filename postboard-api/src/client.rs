/// Session client with retry-on-401
///
/// Holds the access token for one signed-in user and attaches it to every
/// call. When a call answers 401 the client refreshes once and repeats the
/// call once with the new token. If the refresh fails the local session is
/// cleared and the caller sees [`ClientError::SessionExpired`].
///
/// Transport and refresh are traits so the same client drives the HTTP
/// server over the network ([`HttpSession`]) or a router in-process.
///
/// # Example
///
/// ```no_run
/// use postboard_api::client::{ClientRequest, HttpSession, SessionClient};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), postboard_api::client::ClientError> {
/// let http = Arc::new(HttpSession::new("http://localhost:3001")?);
/// let token = http.login("a@x.com", "pw123456").await?;
///
/// let client = SessionClient::new(http.clone(), http);
/// client.set_access_token(token).await;
///
/// let me = client.send(ClientRequest::get("/auth/me")).await?;
/// assert_eq!(me.status, 200);
/// # Ok(())
/// # }
/// ```

use crate::cookies::REFRESH_COOKIE;
use async_trait::async_trait;
use axum::http::Method;
use cookie::Cookie;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, warn};

/// Client-side errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Refresh failed; local session state has been cleared
    #[error("Authentication failed. Please log in again.")]
    SessionExpired,

    /// The server answered with an unexpected status
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A call to make on behalf of the session
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ClientRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

/// Status and decoded JSON body; an empty or non-JSON body is `Null`
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub body: Value,
}

impl ClientResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The envelope's `message`, if any
    pub fn message(&self) -> String {
        self.body["message"].as_str().unwrap_or_default().to_string()
    }
}

/// Sends a request with an optional bearer token
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &ClientRequest,
        access_token: Option<&str>,
    ) -> Result<ClientResponse, ClientError>;
}

/// Obtains a fresh access token from the refresh credential
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<String, ClientError>;
}

pub struct SessionClient {
    transport: Arc<dyn Transport>,
    refresher: Arc<dyn Refresher>,
    access_token: RwLock<Option<String>>,

    /// Serializes refreshes so concurrent 401s share one
    refresh_lock: AsyncMutex<()>,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn Transport>, refresher: Arc<dyn Refresher>) -> Self {
        Self {
            transport,
            refresher,
            access_token: RwLock::new(None),
            refresh_lock: AsyncMutex::new(()),
        }
    }

    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    /// Forgets the local session
    pub async fn clear(&self) {
        *self.access_token.write().await = None;
    }

    /// Sends `request`, refreshing and retrying once on 401
    ///
    /// A 401 on the retried call is returned as is; it never triggers a
    /// second refresh.
    pub async fn send(&self, request: ClientRequest) -> Result<ClientResponse, ClientError> {
        let token = self.access_token().await;
        let response = self.transport.send(&request, token.as_deref()).await?;

        if response.status != 401 {
            return Ok(response);
        }

        debug!(path = %request.path, "Access token rejected, refreshing");
        let fresh = self.refresh_after(token).await?;

        self.transport.send(&request, Some(&fresh)).await
    }

    /// Refreshes unless another call already replaced `stale`
    async fn refresh_after(&self, stale: Option<String>) -> Result<String, ClientError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.access_token().await {
            if stale.as_deref() != Some(current.as_str()) {
                return Ok(current);
            }
        }

        match self.refresher.refresh().await {
            Ok(fresh) => {
                self.set_access_token(fresh.clone()).await;
                Ok(fresh)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear().await;
                Err(ClientError::SessionExpired)
            }
        }
    }
}

/// reqwest-backed transport and refresher for a running server
///
/// Keeps the `refreshToken` cookie from login and replays it on refresh and
/// logout.
pub struct HttpSession {
    client: reqwest::Client,
    base_url: String,
    refresh_cookie: Mutex<Option<String>>,
}

impl HttpSession {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_cookie: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cookie_header(&self) -> Option<String> {
        self.refresh_cookie
            .lock()
            .ok()
            .and_then(|cookie| cookie.clone())
    }

    fn store_cookie(&self, value: Option<String>) {
        if let Ok(mut cookie) = self.refresh_cookie.lock() {
            *cookie = value;
        }
    }

    /// Logs in and returns the access token
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let refresh = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value.to_string()).ok())
            .find(|c| c.name() == REFRESH_COOKIE)
            .map(|c| format!("{}={}", REFRESH_COOKIE, c.value()));

        let decoded = decode(response).await?;
        if !decoded.is_success() {
            return Err(ClientError::Status {
                status: decoded.status,
                message: decoded.message(),
            });
        }

        self.store_cookie(refresh);
        access_token_from(&decoded)
    }

    /// Revokes the refresh token server-side and forgets it
    pub async fn logout(&self) -> Result<(), ClientError> {
        let Some(cookie) = self.cookie_header() else {
            return Ok(());
        };

        let response = self
            .client
            .post(self.url("/auth/logout"))
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await?;

        self.store_cookie(None);

        let decoded = decode(response).await?;
        if decoded.is_success() {
            Ok(())
        } else {
            Err(ClientError::Status {
                status: decoded.status,
                message: decoded.message(),
            })
        }
    }
}

#[async_trait]
impl Transport for HttpSession {
    async fn send(
        &self,
        request: &ClientRequest,
        access_token: Option<&str>,
    ) -> Result<ClientResponse, ClientError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut builder = self.client.request(method, self.url(&request.path));
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        decode(builder.send().await?).await
    }
}

#[async_trait]
impl Refresher for HttpSession {
    async fn refresh(&self) -> Result<String, ClientError> {
        let mut builder = self.client.post(self.url("/auth/refresh"));
        if let Some(cookie) = self.cookie_header() {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        let decoded = decode(builder.send().await?).await?;
        if !decoded.is_success() {
            self.store_cookie(None);
            return Err(ClientError::Status {
                status: decoded.status,
                message: decoded.message(),
            });
        }

        access_token_from(&decoded)
    }
}

async fn decode(response: reqwest::Response) -> Result<ClientResponse, ClientError> {
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok(ClientResponse { status, body })
}

/// Pulls `data.accessToken` out of a success envelope
pub fn access_token_from(response: &ClientResponse) -> Result<String, ClientError> {
    response.body["data"]["accessToken"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ClientError::Transport("response carries no access token".to_string()))
}
