/// Refresh token model and database operations
///
/// Refresh tokens are stored server-side, keyed by their own string value, so
/// they can be revoked before their natural expiry.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE refresh_tokens (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     token TEXT NOT NULL UNIQUE,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     expires_at TIMESTAMPTZ NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// Stored refresh token record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefreshToken {
    /// Row ID
    pub id: Uuid,

    /// Signed token string (unique)
    pub token: String,

    /// Owning user
    pub user_id: Uuid,

    /// Server-side expiry, checked independently of the JWT `exp` claim
    pub expires_at: DateTime<Utc>,

    /// Issue time, used to pick the oldest token on cap eviction
    pub created_at: DateTime<Utc>,
}

/// Input for storing a newly signed refresh token
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a capped insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Expired tokens removed for the user
    pub expired_removed: u64,

    /// Live tokens evicted to stay within the cap
    pub evicted: u64,
}

impl RefreshToken {
    /// Returns true when the stored expiry has passed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Number of oldest live tokens to evict so that one more fits under `cap`
    pub fn surplus(live: usize, cap: usize) -> usize {
        if live >= cap {
            live - cap + 1
        } else {
            0
        }
    }

    /// Prunes and inserts in one transaction
    ///
    /// Sequence, under a row lock on the owning user:
    /// 1. delete this user's expired tokens
    /// 2. evict the oldest live tokens while the count is at or over `cap`
    /// 3. insert the new token
    ///
    /// Locking the user row serializes concurrent logins of the same user.
    pub async fn insert_capped(
        pool: &PgPool,
        data: NewRefreshToken,
        cap: usize,
    ) -> Result<PruneReport, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(data.user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let expired_removed = sqlx::query(
            "DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at <= $2",
        )
        .bind(data.user_id)
        .bind(data.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let live: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM refresh_tokens
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(data.user_id)
        .fetch_all(&mut *tx)
        .await?;

        let surplus = Self::surplus(live.len(), cap);
        let evicted = if surplus > 0 {
            let oldest: Vec<Uuid> = live.into_iter().take(surplus).collect();
            sqlx::query("DELETE FROM refresh_tokens WHERE id = ANY($1)")
                .bind(&oldest)
                .execute(&mut *tx)
                .await?
                .rows_affected()
        } else {
            0
        };

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(data.token)
        .bind(data.user_id)
        .bind(data.expires_at)
        .bind(data.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            user_id = %data.user_id,
            expired_removed,
            evicted,
            "Stored refresh token"
        );

        Ok(PruneReport {
            expired_removed,
            evicted,
        })
    }

    /// Finds a stored token by its string value
    pub async fn find_by_token(pool: &PgPool, token: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, token, user_id, expires_at, created_at
            FROM refresh_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(pool)
        .await
    }

    /// Deletes a stored token; returns true if a row was removed
    pub async fn delete_by_token(pool: &PgPool, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists a user's tokens, oldest first
    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, token, user_id, expires_at, created_at
            FROM refresh_tokens
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}
