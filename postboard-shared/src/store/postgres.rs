use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{CredentialStore, PostStore, StoreError, SubscriptionStore};
use crate::models::{
    post::{CreatePost, PageRequest, Post, PostWithAuthor, UpdatePost},
    refresh_token::{NewRefreshToken, PruneReport, RefreshToken},
    subscription::{Subscription, UpsertSubscription},
    user::{CreateUser, User},
};

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_user(&self, data: CreateUser) -> Result<User, StoreError> {
        Ok(User::create_first_admin_or_customer(&self.pool, data).await?)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_id(&self.pool, id).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_email(&self.pool, email).await?)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        Ok(User::email_exists(&self.pool, email).await?)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(User::delete(&self.pool, id).await?)
    }

    async fn insert_refresh_token_capped(
        &self,
        data: NewRefreshToken,
        cap: usize,
    ) -> Result<PruneReport, StoreError> {
        Ok(RefreshToken::insert_capped(&self.pool, data, cap).await?)
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        Ok(RefreshToken::find_by_token(&self.pool, token).await?)
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        Ok(RefreshToken::delete_by_token(&self.pool, token).await?)
    }

    async fn list_refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, StoreError> {
        Ok(RefreshToken::list_by_user(&self.pool, user_id).await?)
    }
}

#[async_trait]
impl PostStore for PgStore {
    async fn create_post(&self, data: CreatePost) -> Result<Post, StoreError> {
        Ok(Post::create(&self.pool, data).await?)
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        Ok(Post::find_by_id(&self.pool, id).await?)
    }

    async fn find_post_with_author(&self, id: Uuid) -> Result<Option<PostWithAuthor>, StoreError> {
        Ok(Post::find_with_author(&self.pool, id).await?)
    }

    async fn list_posts(
        &self,
        author_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Vec<PostWithAuthor>, StoreError> {
        Ok(Post::list(&self.pool, author_id, page).await?)
    }

    async fn update_post(&self, id: Uuid, data: UpdatePost) -> Result<Option<Post>, StoreError> {
        Ok(Post::update(&self.pool, id, data).await?)
    }

    async fn delete_post(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(Post::delete(&self.pool, id).await?)
    }

    async fn count_posts_since(
        &self,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(Post::count_by_author_since(&self.pool, author_id, since).await?)
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn upsert_subscription(
        &self,
        data: UpsertSubscription,
    ) -> Result<Subscription, StoreError> {
        Ok(Subscription::upsert(&self.pool, data).await?)
    }

    async fn find_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Ok(Subscription::find_by_user(&self.pool, user_id).await?)
    }
}
