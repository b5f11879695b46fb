/// Error handling for the API server
///
/// Every handler returns `Result<T, ApiError>`. Library errors convert into
/// `ApiError` through the `From` impls below, and `ApiError` renders the
/// failure envelope:
///
/// ```json
/// {
///   "status": false,
///   "statusCode": 401,
///   "error": "unauthorized",
///   "message": "Invalid credentials",
///   "timestamp": "2025-01-01T00:00:00.000Z"
/// }
/// ```
///
/// Validation failures add `details: [{field, message}]`.
///
/// # Example
///
/// ```
/// use postboard_api::error::{ApiError, ApiResult};
///
/// fn lookup(found: bool) -> ApiResult<&'static str> {
///     if !found {
///         return Err(ApiError::NotFound("Post not found".to_string()));
///     }
///     Ok("post")
/// }
/// ```

use axum::{
    extract::multipart::MultipartRejection,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use postboard_shared::auth::authorization::AuthzError;
use postboard_shared::auth::middleware::AuthError;
use postboard_shared::auth::password::PasswordError;
use postboard_shared::auth::session::SessionError;
use postboard_shared::auth::token_service::TokenError;
use postboard_shared::billing::quota::QuotaError;
use postboard_shared::billing::BillingError;
use postboard_shared::posts::PostError;
use postboard_shared::search::SearchError;
use postboard_shared::storage::StorageError;
use postboard_shared::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::ValidationErrors;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Bad request (400) with per-field details
    ValidationError(Vec<ValidationErrorDetail>),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409) - e.g., duplicate email
    Conflict(String),

    /// Internal server error (500); the message is logged, never returned
    InternalError(String),

    /// Internal server error (500) with a client-safe message
    OperationFailed(String),

    /// Service unavailable (503) - an integration is not configured
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always `false`
    pub status: bool,

    pub status_code: u16,

    /// Error code (e.g., "bad_request", "unauthorized")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,

    /// RFC 3339, UTC
    pub timestamp: String,
}

/// Current time in the envelope's timestamp format
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) | ApiError::OperationFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Logs `err` and returns an opaque 500
    fn internal(context: &str, err: impl fmt::Display) -> Self {
        ApiError::InternalError(format!("{}: {}", context, err))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (error_code, message, details) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None),
            ApiError::ValidationError(errors) => (
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::Unauthorized(msg) => ("unauthorized", msg, None),
            ApiError::Forbidden(msg) => ("forbidden", msg, None),
            ApiError::NotFound(msg) => ("not_found", msg, None),
            ApiError::Conflict(msg) => ("conflict", msg, None),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::OperationFailed(msg) => ("internal_error", msg, None),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg, None),
        };

        let body = Json(ErrorResponse {
            status: false,
            status_code: status.as_u16(),
            error: error_code.to_string(),
            message,
            details,
            timestamp: timestamp(),
        });

        (status, body).into_response()
    }
}

/// Flattens validator output into `[{field, message}]`, sorted by field
impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| ValidationErrorDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid {}", field)),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(details)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => {
                ApiError::Conflict(format!("Constraint violation: {}", constraint))
            }
            StoreError::Database(e) => ApiError::internal("Database error", e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::Forbidden(err.to_string())
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::internal("Password operation failed", err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidAccessToken(_) | TokenError::InvalidRefreshToken => {
                ApiError::Unauthorized(err.to_string())
            }
            TokenError::Store(e) => e.into(),
            TokenError::Signing(_) | TokenError::Config(_) => ApiError::internal("Token error", err),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation(errors) => errors.into(),
            SessionError::EmailTaken => ApiError::Conflict(err.to_string()),
            SessionError::NoTokenToRevoke => ApiError::BadRequest(err.to_string()),
            SessionError::InvalidCredentials
            | SessionError::NoRefreshToken
            | SessionError::InvalidRefreshToken
            | SessionError::UnknownSubject => ApiError::Unauthorized(err.to_string()),
            SessionError::Token(e) => e.into(),
            SessionError::Store(e) => e.into(),
            SessionError::Password(e) => e.into(),
        }
    }
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Store(e) => e.into(),
            denied => ApiError::Forbidden(denied.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidImage(msg) => ApiError::BadRequest(msg),
            StorageError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            other => ApiError::internal("Image upload failed", other),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError::internal("Search failed", err)
    }
}

impl From<PostError> for ApiError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::Validation(errors) => errors.into(),
            PostError::NotFound => ApiError::NotFound(err.to_string()),
            PostError::Forbidden(e) => e.into(),
            PostError::Quota(e) => e.into(),
            PostError::EmptyQuery => ApiError::BadRequest(err.to_string()),
            PostError::CreateFailed(_) => ApiError::OperationFailed(err.to_string()),
            PostError::Storage(e) => e.into(),
            PostError::Search(e) => e.into(),
            PostError::Store(e) => e.into(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            BillingError::MissingPriceId
            | BillingError::MissingSignature
            | BillingError::InvalidSignature(_)
            | BillingError::InvalidEvent(_) => ApiError::BadRequest(err.to_string()),
            BillingError::UserNotFound => ApiError::Unauthorized(err.to_string()),
            BillingError::NoSubscription => ApiError::NotFound(err.to_string()),
            BillingError::Stripe(e) => ApiError::internal("Stripe request failed", e),
            BillingError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postboard_shared::auth::authorization::PostAction;
    use validator::Validate;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("Post not found".to_string());
        assert_eq!(err.to_string(), "Not found: Post not found");
    }

    #[test]
    fn test_session_error_mapping() {
        assert_eq!(
            ApiError::from(SessionError::EmailTaken).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SessionError::NoRefreshToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SessionError::NoTokenToRevoke).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SessionError::InvalidRefreshToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_post_error_mapping() {
        let forbidden = ApiError::from(PostError::Forbidden(AuthzError::Forbidden {
            action: PostAction::Update,
        }));
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        assert_eq!(
            ApiError::from(PostError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PostError::Storage(StorageError::NotConfigured)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(matches!(
            ApiError::from(PostError::Quota(QuotaError::NoActiveSubscription)),
            ApiError::Forbidden(msg) if msg == "No active subscription"
        ));

        let failed = ApiError::from(PostError::CreateFailed(StoreError::Database(
            sqlx::Error::PoolTimedOut,
        )));
        assert!(matches!(failed, ApiError::OperationFailed(ref msg) if msg == "Failed to create post"));
    }

    #[derive(Validate)]
    struct SignupForm {
        #[validate(email(message = "Invalid email format"))]
        email: String,
        #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
        password: String,
    }

    #[test]
    fn test_validation_details() {
        let errors = SignupForm {
            email: "nope".to_string(),
            password: "short".to_string(),
        }
        .validate()
        .unwrap_err();

        let ApiError::ValidationError(details) = ApiError::from(errors) else {
            panic!("expected validation error");
        };
        assert_eq!(
            details,
            vec![
                ValidationErrorDetail {
                    field: "email".to_string(),
                    message: "Invalid email format".to_string(),
                },
                ValidationErrorDetail {
                    field: "password".to_string(),
                    message: "Password must be at least 8 characters".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = ApiError::Unauthorized("Invalid credentials".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], false);
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["error"], "unauthorized");
        assert_eq!(json["message"], "Invalid credentials");
        assert!(json.get("details").is_none());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_internal_error_is_hidden() {
        let response = ApiError::InternalError("db password wrong".to_string()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("db password"));
    }
}
