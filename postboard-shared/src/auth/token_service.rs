/// Access and refresh token issuance
///
/// Access tokens are stateless. Refresh tokens are signed and also stored,
/// so a refresh token is only accepted while its stored record exists and
/// has not expired. Issuance enforces a per-user cap on live refresh tokens,
/// evicting the oldest first.
///
/// # Example
///
/// ```
/// use postboard_shared::auth::token_service::{TokenConfig, TokenService};
/// use postboard_shared::store::{CredentialStore, MemoryStore};
/// use postboard_shared::models::user::CreateUser;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::new());
/// let tokens = TokenService::new(
///     TokenConfig::new(
///         "access-secret-at-least-32-bytes-long!!",
///         "refresh-secret-at-least-32-bytes-long!",
///     ),
///     store.clone(),
/// )?;
///
/// let user = store
///     .create_user(CreateUser {
///         email: "a@x.com".into(),
///         name: "A".into(),
///         password_hash: "$argon2id$...".into(),
///     })
///     .await?;
///
/// let refresh = tokens.issue_refresh_token(user.id).await?;
/// assert_eq!(tokens.verify_refresh_token(&refresh).await?, user.id);
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::jwt::{self, AccessClaims, JwtError, RefreshClaims};
use super::middleware::AuthContext;
use crate::models::{refresh_token::NewRefreshToken, user::User};
use crate::store::{CredentialStore, StoreError};

/// Message shared by every refresh-token rejection
pub const INVALID_REFRESH_TOKEN: &str = "Invalid or expired refresh token";

/// Minimum secret length, in bytes
pub const MIN_SECRET_LENGTH: usize = 32;

/// Error type for token operations
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Access token failed verification
    #[error("Invalid or expired access token")]
    InvalidAccessToken(#[source] JwtError),

    /// Refresh token failed verification (signature, record or expiry)
    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    /// Signing failed
    #[error("Failed to sign token: {0}")]
    Signing(#[source] JwtError),

    /// Secrets or limits are unusable
    #[error("Invalid token configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Secrets, lifetimes and the refresh-token cap
#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Maximum live refresh tokens per user
    pub max_refresh_tokens: usize,
}

impl TokenConfig {
    /// Config with the default lifetimes (15 minutes / 7 days) and a cap of 5
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            max_refresh_tokens: 5,
        }
    }

    /// Rejects short or identical secrets, non-positive lifetimes and a zero cap
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.access_secret.len() < MIN_SECRET_LENGTH {
            return Err(TokenError::Config(format!(
                "access secret must be at least {} characters",
                MIN_SECRET_LENGTH
            )));
        }
        if self.refresh_secret.len() < MIN_SECRET_LENGTH {
            return Err(TokenError::Config(format!(
                "refresh secret must be at least {} characters",
                MIN_SECRET_LENGTH
            )));
        }
        if self.access_secret == self.refresh_secret {
            return Err(TokenError::Config(
                "access and refresh secrets must differ".to_string(),
            ));
        }
        if self.access_ttl <= Duration::zero() || self.refresh_ttl <= Duration::zero() {
            return Err(TokenError::Config("token lifetimes must be positive".to_string()));
        }
        if self.max_refresh_tokens == 0 {
            return Err(TokenError::Config(
                "max refresh tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("max_refresh_tokens", &self.max_refresh_tokens)
            .finish()
    }
}

/// Issues and verifies tokens against a credential store
pub struct TokenService {
    config: TokenConfig,
    store: Arc<dyn CredentialStore>,
}

impl TokenService {
    /// Validates the config and builds the service
    pub fn new(config: TokenConfig, store: Arc<dyn CredentialStore>) -> Result<Self, TokenError> {
        config.validate()?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Signs a short-lived access token for `user`
    pub fn issue_access_token(&self, user: &User) -> Result<String, TokenError> {
        let claims = AccessClaims::new(user.id, &user.email, user.role, self.config.access_ttl);
        jwt::create_token(&claims, &self.config.access_secret).map_err(TokenError::Signing)
    }

    /// Signs and stores a refresh token for `user_id`
    ///
    /// The store sweeps the user's expired tokens and evicts the oldest live
    /// ones before inserting, all in one transaction.
    pub async fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = RefreshClaims::new(user_id, self.config.refresh_ttl);
        let token =
            jwt::create_token(&claims, &self.config.refresh_secret).map_err(TokenError::Signing)?;

        let report = self
            .store
            .insert_refresh_token_capped(
                NewRefreshToken {
                    token: token.clone(),
                    user_id,
                    expires_at: now + self.config.refresh_ttl,
                    created_at: now,
                },
                self.config.max_refresh_tokens,
            )
            .await?;

        if report.evicted > 0 {
            info!(
                user_id = %user_id,
                evicted = report.evicted,
                cap = self.config.max_refresh_tokens,
                "Evicted oldest refresh tokens"
            );
        }

        Ok(token)
    }

    /// Verifies an access token and returns the caller's identity
    pub fn verify_access_token(&self, token: &str) -> Result<AuthContext, TokenError> {
        jwt::decode_access_token(token, &self.config.access_secret)
            .map(AuthContext::from)
            .map_err(TokenError::InvalidAccessToken)
    }

    /// Verifies a refresh token and returns its owner
    ///
    /// Rejects with [`TokenError::InvalidRefreshToken`] when the signature or
    /// expiry is bad, when no stored record exists, or when the stored record
    /// has expired.
    pub async fn verify_refresh_token(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims = jwt::decode_refresh_token(token, &self.config.refresh_secret).map_err(|e| {
            debug!(error = %e, "Refresh token failed verification");
            TokenError::InvalidRefreshToken
        })?;

        let record = self
            .store
            .find_refresh_token(token)
            .await?
            .ok_or_else(|| {
                debug!(user_id = %claims.sub, "Refresh token has no stored record");
                TokenError::InvalidRefreshToken
            })?;

        if record.is_expired_at(Utc::now()) || record.user_id != claims.sub {
            debug!(user_id = %claims.sub, "Stored refresh token rejected");
            return Err(TokenError::InvalidRefreshToken);
        }

        Ok(record.user_id)
    }

    /// Deletes the stored record; returns whether one existed
    pub async fn revoke(&self, token: &str) -> Result<bool, TokenError> {
        Ok(self.store.delete_refresh_token(token).await?)
    }
}
