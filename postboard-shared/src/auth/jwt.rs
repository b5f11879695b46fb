/// JWT encoding and decoding
///
/// Two token kinds share this module but never a secret: access tokens are
/// signed with the access secret and refresh tokens with the refresh secret.
/// Each carries a `token_type` claim so a token of one kind is rejected where
/// the other is expected even if the secrets were ever misconfigured.
///
/// # Security
///
/// - **Algorithm**: HS256
/// - **Leeway**: zero seconds on `exp` and `nbf`
/// - **Uniqueness**: every token carries a random `jti`, so two tokens minted
///   for the same user in the same second are different strings
///
/// # Example
///
/// ```
/// use postboard_shared::auth::jwt::{create_token, decode_access_token, AccessClaims};
/// use postboard_shared::models::user::Role;
/// use chrono::Duration;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = "access-secret-at-least-32-bytes-long!!";
/// let claims = AccessClaims::new(Uuid::new_v4(), "a@x.com", Role::Admin, Duration::minutes(15));
/// let token = create_token(&claims, secret)?;
///
/// let decoded = decode_access_token(&token, secret)?;
/// assert_eq!(decoded.sub, claims.sub);
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::Role;

/// Value of the `iss` claim on every token
pub const ISSUER: &str = "postboard";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to sign token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// `exp` is in the past
    #[error("Token has expired")]
    Expired,

    /// Bad signature, bad issuer, `nbf` in the future or malformed input
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// Valid token of the other kind
    #[error("Expected {expected} token, got {actual} token")]
    WrongTokenType {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Token type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims shared by both kinds, used to check `token_type`
trait TypedClaims {
    fn token_type(&self) -> TokenType;
}

/// Access token claims
///
/// Carries enough identity (`sub`, `email`, `role`) for the guard to build a
/// request context without a database round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject - user ID
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Random token ID
    pub jti: Uuid,
    pub token_type: TokenType,
}

impl AccessClaims {
    /// Builds claims valid from now for `ttl`
    pub fn new(user_id: Uuid, email: &str, role: Role, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            email: email.to_string(),
            role,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4(),
            token_type: TokenType::Access,
        }
    }
}

impl TypedClaims for AccessClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

/// Refresh token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject - user ID
    pub sub: Uuid,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Random token ID
    pub jti: Uuid,
    pub token_type: TokenType,
}

impl RefreshClaims {
    pub fn new(user_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4(),
            token_type: TokenType::Refresh,
        }
    }
}

impl TypedClaims for RefreshClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

/// Signs claims with HS256
pub fn create_token<T: Serialize>(claims: &T, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;
    validation
}

fn decode_typed<T>(token: &str, secret: &str, expected: TokenType) -> Result<T, JwtError>
where
    T: DeserializeOwned + TypedClaims,
{
    let key = DecodingKey::from_secret(secret.as_bytes());

    let claims = decode::<T>(token, &key, &validation())
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e.to_string()),
        })?
        .claims;

    let actual = claims.token_type();
    if actual != expected {
        return Err(JwtError::WrongTokenType {
            expected: expected.as_str(),
            actual: actual.as_str(),
        });
    }

    Ok(claims)
}

/// Verifies signature, issuer, time window and `token_type = access`
pub fn decode_access_token(token: &str, secret: &str) -> Result<AccessClaims, JwtError> {
    decode_typed(token, secret, TokenType::Access)
}

/// Verifies signature, issuer, time window and `token_type = refresh`
pub fn decode_refresh_token(token: &str, secret: &str) -> Result<RefreshClaims, JwtError> {
    decode_typed(token, secret, TokenType::Refresh)
}
