/// Persistence seams for the services
///
/// Services depend on these traits rather than on a `PgPool` so the same
/// session, post and billing logic runs against Postgres in production and
/// against [`MemoryStore`] in tests and local demos.
///
/// # Implementations
///
/// - [`PgStore`]: delegates to the sqlx queries in [`crate::models`]
/// - [`MemoryStore`]: one `tokio::sync::Mutex` around plain collections
///
/// # Example
///
/// ```
/// use postboard_shared::store::{CredentialStore, MemoryStore};
/// use postboard_shared::models::user::{CreateUser, Role};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new();
/// let user = store
///     .create_user(CreateUser {
///         email: "first@example.com".to_string(),
///         name: "First".to_string(),
///         password_hash: "$argon2id$...".to_string(),
///     })
///     .await?;
/// assert_eq!(user.role, Role::Admin);
/// # Ok(())
/// # }
/// ```

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    post::{CreatePost, PageRequest, Post, PostWithAuthor, UpdatePost},
    refresh_token::{NewRefreshToken, PruneReport, RefreshToken},
    subscription::{Subscription, UpsertSubscription},
    user::{CreateUser, User},
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write
    #[error("Conflicting record: {0}")]
    Conflict(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Database(err)
    }
}

/// Users and their refresh tokens
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a user; the very first user becomes `Admin`
    ///
    /// Returns `StoreError::Conflict` when the email is taken.
    async fn create_user(&self, data: CreateUser) -> Result<User, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;

    /// Deletes a user together with their tokens, posts and subscription
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Sweeps expired tokens, evicts the oldest live ones down to `cap - 1`
    /// and inserts the new token, atomically per user
    async fn insert_refresh_token_capped(
        &self,
        data: NewRefreshToken,
        cap: usize,
    ) -> Result<PruneReport, StoreError>;

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError>;

    /// Returns true if a record was removed
    async fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError>;

    /// Oldest first
    async fn list_refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, StoreError>;
}

/// Posts and the author projection
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create_post(&self, data: CreatePost) -> Result<Post, StoreError>;

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>, StoreError>;

    async fn find_post_with_author(&self, id: Uuid) -> Result<Option<PostWithAuthor>, StoreError>;

    /// Newest first; `author_id = None` lists every author
    async fn list_posts(
        &self,
        author_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Vec<PostWithAuthor>, StoreError>;

    async fn update_post(&self, id: Uuid, data: UpdatePost) -> Result<Option<Post>, StoreError>;

    async fn delete_post(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Posts by `author_id` created at or after `since`
    async fn count_posts_since(
        &self,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;
}

/// Billing state written by the Stripe webhook
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn upsert_subscription(
        &self,
        data: UpsertSubscription,
    ) -> Result<Subscription, StoreError>;

    async fn find_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError>;
}
