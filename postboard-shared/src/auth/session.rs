/// Session protocol: register, login, refresh, logout and get-self
///
/// A client moves Anonymous → Authenticated on login and back on logout.
/// Login yields a short-lived access token (sent as a bearer header) and a
/// long-lived refresh token (carried in an HttpOnly cookie by the API).
/// Refresh exchanges the refresh token for a new access token without
/// rotating the refresh token itself.
///
/// # Example
///
/// ```
/// use postboard_shared::auth::password::PasswordParams;
/// use postboard_shared::auth::session::{LoginInput, RegisterInput, SessionService};
/// use postboard_shared::auth::token_service::{TokenConfig, TokenService};
/// use postboard_shared::store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::new());
/// let tokens = Arc::new(TokenService::new(
///     TokenConfig::new(
///         "access-secret-at-least-32-bytes-long!!",
///         "refresh-secret-at-least-32-bytes-long!",
///     ),
///     store.clone(),
/// )?);
/// let sessions = SessionService::new(store, tokens, PasswordParams::light());
///
/// sessions
///     .register(RegisterInput {
///         email: "a@x.com".into(),
///         name: "A".into(),
///         password: "pw123456".into(),
///         role: None,
///     })
///     .await?;
///
/// let login = sessions
///     .login(LoginInput { email: "a@x.com".into(), password: "pw123456".into() })
///     .await?;
/// let refreshed = sessions.refresh(Some(&login.refresh_token)).await?;
/// assert!(!refreshed.access_token.is_empty());
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};
use validator::{Validate, ValidationErrors};

use super::middleware::AuthContext;
use super::password::{self, PasswordError, PasswordParams};
use super::token_service::{TokenError, TokenService};
use crate::models::user::{CreateUser, PublicUser, Role};
use crate::store::{CredentialStore, StoreError};

/// Hashed once per service and verified against when the email is unknown
const DUMMY_PASSWORD: &str = "postboard-unknown-account";

/// Error type for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Input failed field validation
    #[error("Validation failed")]
    Validation(#[from] ValidationErrors),

    /// Email already registered
    #[error("User with this email already exists")]
    EmailTaken,

    /// Unknown email or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Refresh attempted without a token
    #[error("No refresh token provided")]
    NoRefreshToken,

    /// Logout attempted without a token
    #[error("No refresh token provided")]
    NoTokenToRevoke,

    /// Refresh token rejected, or its owner is gone
    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    /// Verified subject no longer exists
    #[error("User not found")]
    UnknownSubject,

    #[error(transparent)]
    Token(TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidRefreshToken => SessionError::InvalidRefreshToken,
            TokenError::Store(e) => SessionError::Store(e),
            other => SessionError::Token(other),
        }
    }
}

/// Registration input
///
/// Unknown fields are rejected; `role` is the one extra field tolerated.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterInput {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    /// Accepted on the wire but never stored; the role is computed
    #[serde(default)]
    pub role: Option<Role>,
}

impl RegisterInput {
    fn normalized(self) -> Self {
        Self {
            email: self.email.trim().to_string(),
            name: self.name.trim().to_string(),
            ..self
        }
    }
}

/// Login input
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoginInput {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    /// Goes into the cookie, never the response body
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Successful refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub access_token: String,
}

/// Drives the session state machine over a credential store
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
    password_params: PasswordParams,
    dummy_hash: OnceCell<String>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
        password_params: PasswordParams,
    ) -> Self {
        Self {
            store,
            tokens,
            password_params,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Creates an account and returns its public profile
    ///
    /// The first account ever created is `ADMIN`; a role in the input is
    /// ignored. A taken email fails with `EmailTaken` and leaves the store
    /// untouched.
    pub async fn register(&self, input: RegisterInput) -> Result<PublicUser, SessionError> {
        let input = input.normalized();
        input.validate()?;

        if input.role.is_some() {
            warn!(email = %input.email, "Ignoring role supplied at registration");
        }

        if self.store.email_exists(&input.email).await? {
            return Err(SessionError::EmailTaken);
        }

        let password_hash =
            password::hash_password_blocking(input.password, self.password_params).await?;

        let user = self
            .store
            .create_user(CreateUser {
                email: input.email,
                name: input.name,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent registration
                StoreError::Conflict(_) => SessionError::EmailTaken,
                other => SessionError::Store(other),
            })?;

        info!(user_id = %user.id, role = %user.role, "User registered");

        Ok(PublicUser::from(user))
    }

    /// Checks credentials and issues one access and one refresh token
    pub async fn login(&self, input: LoginInput) -> Result<LoginOutcome, SessionError> {
        input.validate()?;

        let Some(user) = self.store.find_user_by_email(input.email.trim()).await? else {
            self.verify_against_dummy(input.password).await?;
            return Err(SessionError::InvalidCredentials);
        };

        let verified = password::verify_password_blocking(input.password, user.password_hash.clone())
            .await
            .map_err(|e| {
                error!(user_id = %user.id, error = %e, "Stored password hash is unusable");
                e
            })?;
        if !verified {
            return Err(SessionError::InvalidCredentials);
        }

        let access_token = self.tokens.issue_access_token(&user)?;
        let refresh_token = self.tokens.issue_refresh_token(user.id).await?;

        info!(user_id = %user.id, "User logged in");

        Ok(LoginOutcome {
            access_token,
            refresh_token,
            user: PublicUser::from(user),
        })
    }

    /// Spends one Argon2 verification on a miss, matching the wrong-password path
    async fn verify_against_dummy(&self, password: String) -> Result<(), SessionError> {
        let params = self.password_params;
        let hash = self
            .dummy_hash
            .get_or_try_init(|| {
                password::hash_password_blocking(DUMMY_PASSWORD.to_string(), params)
            })
            .await?;
        password::verify_password_blocking(password, hash.clone()).await?;
        Ok(())
    }

    /// Exchanges a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<RefreshOutcome, SessionError> {
        let token = present(refresh_token).ok_or(SessionError::NoRefreshToken)?;

        let user_id = self.tokens.verify_refresh_token(token).await?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(SessionError::InvalidRefreshToken)?;

        Ok(RefreshOutcome {
            access_token: self.tokens.issue_access_token(&user)?,
        })
    }

    /// Revokes the refresh token
    ///
    /// Succeeds even when the token was already revoked or has expired.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), SessionError> {
        let token = present(refresh_token).ok_or(SessionError::NoTokenToRevoke)?;

        if !self.tokens.revoke(token).await? {
            info!("Logout for an unknown or already revoked refresh token");
        }

        Ok(())
    }

    /// Public profile of the authenticated caller
    pub async fn get_self(&self, auth: &AuthContext) -> Result<PublicUser, SessionError> {
        self.store
            .find_user_by_id(auth.user_id)
            .await?
            .map(PublicUser::from)
            .ok_or(SessionError::UnknownSubject)
    }
}

fn present(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}
