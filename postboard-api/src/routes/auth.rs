/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /auth/register` - Register a new user
/// - `POST /auth/login` - Login; sets the `refreshToken` cookie
/// - `POST /auth/refresh` - New access token from the cookie
/// - `POST /auth/logout` - Revoke the cookie's token and clear it
/// - `GET /auth/me` - Profile of the bearer token's subject

use crate::{
    app::AppState,
    cookies::{clear_refresh_cookie, read_refresh_token, refresh_cookie},
    error::ApiResult,
    extract::AppJson,
    response::ApiResponse,
};
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Extension,
};
use postboard_shared::{
    auth::{
        middleware::AuthContext,
        session::{LoginInput, RefreshOutcome, RegisterInput},
    },
    models::user::PublicUser,
};
use serde::Serialize;

/// Login response body; the refresh token travels in the cookie
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: PublicUser,
}

/// Register a new user
///
/// # Endpoint
///
/// ```text
/// POST /auth/register
/// Content-Type: application/json
///
/// {
///   "email": "user@example.com",
///   "name": "Jane Doe",
///   "password": "correct horse"
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Malformed body, unknown field or validation failed
/// - `409 Conflict`: Email already exists
pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterInput>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let user = state.sessions.register(req).await?;
    Ok(ApiResponse::created(user))
}

/// Login
///
/// # Errors
///
/// - `400 Bad Request`: Validation failed
/// - `401 Unauthorized`: Invalid credentials
pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginInput>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.sessions.login(req).await?;

    let cookie = refresh_cookie(
        &outcome.refresh_token,
        state.config.jwt.refresh_ttl(),
        state.secure_cookies(),
    );

    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        ApiResponse::ok(LoginResponse {
            access_token: outcome.access_token,
            user: outcome.user,
        }),
    ))
}

/// Refresh the access token
///
/// # Errors
///
/// - `401 Unauthorized`: No cookie, or the refresh token is invalid, expired or revoked
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ApiResponse<RefreshOutcome>> {
    let token = read_refresh_token(&headers);
    let outcome = state.sessions.refresh(token.as_deref()).await?;
    Ok(ApiResponse::ok(outcome))
}

/// Logout
///
/// Does not require a bearer token; the cookie is the credential revoked.
///
/// # Errors
///
/// - `400 Bad Request`: No cookie
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let token = read_refresh_token(&headers);
    state.sessions.logout(token.as_deref()).await?;

    Ok((
        [(
            header::SET_COOKIE,
            clear_refresh_cookie(state.secure_cookies()).to_string(),
        )],
        ApiResponse::ok(serde_json::json!({ "message": "Logged out successfully" })),
    ))
}

/// Current user
///
/// # Errors
///
/// - `401 Unauthorized`: Bad bearer token, or the user no longer exists
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let user = state.sessions.get_self(&auth).await?;
    Ok(ApiResponse::ok(user))
}
