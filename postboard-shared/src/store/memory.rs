use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CredentialStore, PostStore, StoreError, SubscriptionStore};
use crate::models::{
    post::{CreatePost, PageRequest, Post, PostAuthor, PostWithAuthor, UpdatePost},
    refresh_token::{NewRefreshToken, PruneReport, RefreshToken},
    subscription::{Subscription, UpsertSubscription},
    user::{CreateUser, Role, User},
};

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<User>,
    /// Insertion order doubles as the tie-break for equal `created_at`
    refresh_tokens: Vec<RefreshToken>,
    posts: Vec<Post>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl MemoryState {
    fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    fn with_author(&self, post: &Post) -> Option<PostWithAuthor> {
        let author = self.users.iter().find(|u| u.id == post.author_id)?;
        Some(PostWithAuthor {
            post: post.clone(),
            author: PostAuthor {
                id: author.id,
                name: author.name.clone(),
                email: author.email.clone(),
            },
        })
    }
}

/// In-process store
///
/// Every operation takes the single lock for its whole duration, which gives
/// the same per-user atomicity as the Postgres transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, data: CreateUser) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;

        if state.user_by_email(&data.email).is_some() {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: data.email,
            name: data.name,
            password_hash: data.password_hash,
            role: Role::for_registration(state.users.len() as i64),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());

        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.user_by_email(email).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.user_by_email(email).is_some())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;

        let before = state.users.len();
        state.users.retain(|u| u.id != id);
        if state.users.len() == before {
            return Ok(false);
        }

        state.refresh_tokens.retain(|t| t.user_id != id);
        state.posts.retain(|p| p.author_id != id);
        state.subscriptions.remove(&id);

        Ok(true)
    }

    async fn insert_refresh_token_capped(
        &self,
        data: NewRefreshToken,
        cap: usize,
    ) -> Result<PruneReport, StoreError> {
        let mut state = self.state.lock().await;

        if state.refresh_tokens.iter().any(|t| t.token == data.token) {
            return Err(StoreError::Conflict("refresh_tokens_token_key".to_string()));
        }

        let before = state.refresh_tokens.len();
        state
            .refresh_tokens
            .retain(|t| t.user_id != data.user_id || !t.is_expired_at(data.created_at));
        let expired_removed = (before - state.refresh_tokens.len()) as u64;

        let mut live: Vec<(DateTime<Utc>, usize, Uuid)> = state
            .refresh_tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.user_id == data.user_id)
            .map(|(seq, t)| (t.created_at, seq, t.id))
            .collect();
        live.sort();

        let surplus = RefreshToken::surplus(live.len(), cap);
        let oldest: Vec<Uuid> = live.into_iter().take(surplus).map(|(_, _, id)| id).collect();
        state.refresh_tokens.retain(|t| !oldest.contains(&t.id));

        state.refresh_tokens.push(RefreshToken {
            id: Uuid::new_v4(),
            token: data.token,
            user_id: data.user_id,
            expires_at: data.expires_at,
            created_at: data.created_at,
        });

        Ok(PruneReport {
            expired_removed,
            evicted: oldest.len() as u64,
        })
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.refresh_tokens.iter().find(|t| t.token == token).cloned())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|t| t.token != token);
        Ok(state.refresh_tokens.len() < before)
    }

    async fn list_refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, StoreError> {
        let state = self.state.lock().await;
        let mut tokens: Vec<RefreshToken> = state
            .refresh_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create_post(&self, data: CreatePost) -> Result<Post, StoreError> {
        let mut state = self.state.lock().await;

        if !state.users.iter().any(|u| u.id == data.author_id) {
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }

        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            title: data.title,
            body_text: data.body_text,
            image_url: data.image_url,
            author_id: data.author_id,
            created_at: now,
            updated_at: now,
        };
        state.posts.push(post.clone());

        Ok(post)
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn find_post_with_author(&self, id: Uuid) -> Result<Option<PostWithAuthor>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .find(|p| p.id == id)
            .and_then(|p| state.with_author(p)))
    }

    async fn list_posts(
        &self,
        author_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Vec<PostWithAuthor>, StoreError> {
        let state = self.state.lock().await;

        // Newest insert first, then a stable sort keeps that order on ties
        let mut posts: Vec<&Post> = state
            .posts
            .iter()
            .rev()
            .filter(|p| author_id.map_or(true, |a| p.author_id == a))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(posts
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .filter_map(|p| state.with_author(p))
            .collect())
    }

    async fn update_post(&self, id: Uuid, data: UpdatePost) -> Result<Option<Post>, StoreError> {
        let mut state = self.state.lock().await;

        let Some(post) = state.posts.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        data.apply(post);
        post.updated_at = Utc::now();

        Ok(Some(post.clone()))
    }

    async fn delete_post(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.posts.len();
        state.posts.retain(|p| p.id != id);
        Ok(state.posts.len() < before)
    }

    async fn count_posts_since(
        &self,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .filter(|p| p.author_id == author_id && p.created_at >= since)
            .count() as i64)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert_subscription(
        &self,
        data: UpsertSubscription,
    ) -> Result<Subscription, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let subscription = match state.subscriptions.get(&data.user_id) {
            Some(existing) => Subscription {
                stripe_subscription_id: data.stripe_subscription_id,
                status: data.status,
                tier: data.tier,
                post_limit: data.post_limit,
                interval: data.interval,
                current_period_end: data.current_period_end,
                updated_at: now,
                ..existing.clone()
            },
            None => Subscription {
                id: Uuid::new_v4(),
                user_id: data.user_id,
                stripe_customer_id: data.stripe_customer_id,
                stripe_subscription_id: data.stripe_subscription_id,
                status: data.status,
                tier: data.tier,
                post_limit: data.post_limit,
                interval: data.interval,
                current_period_end: data.current_period_end,
                created_at: now,
                updated_at: now,
            },
        };
        state
            .subscriptions
            .insert(subscription.user_id, subscription.clone());

        Ok(subscription)
    }

    async fn find_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.subscriptions.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subscription::SubscriptionTier;
    use chrono::Duration;

    fn new_user(email: &str) -> CreateUser {
        CreateUser {
            email: email.to_string(),
            name: "Test".to_string(),
            password_hash: "$argon2id$hash".to_string(),
        }
    }

    fn new_token(user_id: Uuid, token: &str, created_at: DateTime<Utc>) -> NewRefreshToken {
        NewRefreshToken {
            token: token.to_string(),
            user_id,
            expires_at: created_at + Duration::days(7),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_first_user_is_admin_then_customers() {
        let store = MemoryStore::new();

        let first = store.create_user(new_user("a@x.com")).await.unwrap();
        let second = store.create_user(new_user("b@x.com")).await.unwrap();

        assert_eq!(first.role, Role::Admin);
        assert_eq!(second.role, Role::Customer);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict_case_insensitive() {
        let store = MemoryStore::new();
        store.create_user(new_user("a@x.com")).await.unwrap();

        let result = store.create_user(new_user("A@X.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.email_exists("A@x.COM").await.unwrap());
    }

    #[tokio::test]
    async fn test_capped_insert_evicts_oldest() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@x.com")).await.unwrap();
        let base = Utc::now();

        for i in 0..5 {
            let report = store
                .insert_refresh_token_capped(
                    new_token(user.id, &format!("t{}", i), base + Duration::seconds(i)),
                    5,
                )
                .await
                .unwrap();
            assert_eq!(report, PruneReport::default());
        }

        let report = store
            .insert_refresh_token_capped(new_token(user.id, "t5", base + Duration::seconds(5)), 5)
            .await
            .unwrap();
        assert_eq!(report.evicted, 1);

        let tokens: Vec<String> = store
            .list_refresh_tokens(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(tokens, vec!["t1", "t2", "t3", "t4", "t5"]);
    }

    #[tokio::test]
    async fn test_capped_insert_sweeps_expired_first() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@x.com")).await.unwrap();
        let now = Utc::now();

        store
            .insert_refresh_token_capped(
                NewRefreshToken {
                    token: "stale".to_string(),
                    user_id: user.id,
                    expires_at: now - Duration::seconds(1),
                    created_at: now - Duration::days(8),
                },
                2,
            )
            .await
            .unwrap();
        let report = store
            .insert_refresh_token_capped(new_token(user.id, "live", now), 2)
            .await
            .unwrap();
        assert_eq!(report.expired_removed, 1);
        assert_eq!(report.evicted, 0);

        // With the stale one gone there is room for a second live token
        let report = store
            .insert_refresh_token_capped(new_token(user.id, "newest", now), 2)
            .await
            .unwrap();
        assert_eq!(report, PruneReport::default());

        assert!(store.find_refresh_token("stale").await.unwrap().is_none());
        assert!(store.find_refresh_token("live").await.unwrap().is_some());
        assert!(store.find_refresh_token("newest").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cap_is_per_user() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("a@x.com")).await.unwrap();
        let bob = store.create_user(new_user("b@x.com")).await.unwrap();
        let now = Utc::now();

        store
            .insert_refresh_token_capped(new_token(alice.id, "alice", now), 1)
            .await
            .unwrap();
        store
            .insert_refresh_token_capped(new_token(bob.id, "bob", now), 1)
            .await
            .unwrap();

        assert!(store.find_refresh_token("alice").await.unwrap().is_some());
        assert!(store.find_refresh_token("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@x.com")).await.unwrap();
        store
            .insert_refresh_token_capped(new_token(user.id, "t", Utc::now()), 5)
            .await
            .unwrap();
        store
            .create_post(CreatePost {
                title: "hello".to_string(),
                body_text: None,
                image_url: None,
                author_id: user.id,
            })
            .await
            .unwrap();

        assert!(store.delete_user(user.id).await.unwrap());
        assert!(store.find_refresh_token("t").await.unwrap().is_none());
        assert!(store.list_posts(None, PageRequest::default()).await.unwrap().is_empty());
        assert!(!store.delete_user(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_posts_newest_first_and_filtered() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("a@x.com")).await.unwrap();
        let bob = store.create_user(new_user("b@x.com")).await.unwrap();

        for (author, title) in [(alice.id, "a1"), (bob.id, "b1"), (alice.id, "a2")] {
            store
                .create_post(CreatePost {
                    title: title.to_string(),
                    body_text: None,
                    image_url: None,
                    author_id: author,
                })
                .await
                .unwrap();
        }

        let all: Vec<String> = store
            .list_posts(None, PageRequest::default())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.post.title)
            .collect();
        assert_eq!(all, vec!["a2", "b1", "a1"]);

        let mine = store
            .list_posts(Some(alice.id), PageRequest::new(Some(2), Some(1)))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].post.title, "a1");
        assert_eq!(mine[0].author.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_subscription_upsert_keeps_created_at() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@x.com")).await.unwrap();

        let data = UpsertSubscription {
            user_id: user.id,
            stripe_customer_id: "cus_1".to_string(),
            stripe_subscription_id: "sub_1".to_string(),
            status: "active".to_string(),
            tier: SubscriptionTier::Lite,
            post_limit: Some(3),
            interval: "month".to_string(),
            current_period_end: Utc::now() + Duration::days(30),
        };
        let first = store.upsert_subscription(data.clone()).await.unwrap();

        let second = store
            .upsert_subscription(UpsertSubscription {
                tier: SubscriptionTier::Pro,
                post_limit: None,
                ..data
            })
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.tier, SubscriptionTier::Pro);
        assert_eq!(second.post_limit, None);
    }
}
