/// Post model and database operations
///
/// # Schema
///
/// ```sql
/// CREATE TABLE posts (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     title VARCHAR(255) NOT NULL,
///     body_text TEXT,
///     image_url VARCHAR(1024),
///     author_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Post row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub body_text: Option<String>,
    pub image_url: Option<String>,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author summary embedded in post listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAuthor {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Post joined with its author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostWithAuthor {
    #[serde(flatten)]
    pub post: Post,
    pub author: PostAuthor,
}

/// Flat row shape of the posts/users join
#[derive(sqlx::FromRow)]
struct PostAuthorRow {
    id: Uuid,
    title: String,
    body_text: Option<String>,
    image_url: Option<String>,
    author_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    author_name: String,
    author_email: String,
}

impl From<PostAuthorRow> for PostWithAuthor {
    fn from(row: PostAuthorRow) -> Self {
        Self {
            author: PostAuthor {
                id: row.author_id,
                name: row.author_name,
                email: row.author_email,
            },
            post: Post {
                id: row.id,
                title: row.title,
                body_text: row.body_text,
                image_url: row.image_url,
                author_id: row.author_id,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        }
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePost {
    pub title: String,
    pub body_text: Option<String>,
    pub image_url: Option<String>,
    pub author_id: Uuid,
}

/// Partial update; only `Some` fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub image_url: Option<String>,
}

impl UpdatePost {
    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body_text.is_none() && self.image_url.is_none()
    }

    /// Applies the update to an in-memory post
    pub fn apply(self, post: &mut Post) {
        if let Some(title) = self.title {
            post.title = title;
        }
        if let Some(body_text) = self.body_text {
            post.body_text = Some(body_text);
        }
        if let Some(image_url) = self.image_url {
            post.image_url = Some(image_url);
        }
    }
}

/// Page window for listings (1-based page)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    /// Clamps page to ≥ 1 and limit to 1..=MAX_LIMIT
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

const SELECT_WITH_AUTHOR: &str = r#"
    SELECT p.id, p.title, p.body_text, p.image_url, p.author_id,
           p.created_at, p.updated_at,
           u.name AS author_name, u.email AS author_email
    FROM posts p
    JOIN users u ON u.id = p.author_id
"#;

impl Post {
    /// Inserts a new post
    pub async fn create(pool: &PgPool, data: CreatePost) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (title, body_text, image_url, author_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, title, body_text, image_url, author_id, created_at, updated_at
            "#,
        )
        .bind(data.title)
        .bind(data.body_text)
        .bind(data.image_url)
        .bind(data.author_id)
        .fetch_one(pool)
        .await
    }

    /// Finds a bare post row
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, title, body_text, image_url, author_id, created_at, updated_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Finds a post with its author
    pub async fn find_with_author(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<PostWithAuthor>, sqlx::Error> {
        let query = format!("{} WHERE p.id = $1", SELECT_WITH_AUTHOR);
        let row = sqlx::query_as::<_, PostAuthorRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(row.map(PostWithAuthor::from))
    }

    /// Lists posts newest first, optionally restricted to one author
    pub async fn list(
        pool: &PgPool,
        author_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Vec<PostWithAuthor>, sqlx::Error> {
        let query = format!(
            "{} WHERE ($1::uuid IS NULL OR p.author_id = $1) \
             ORDER BY p.created_at DESC, p.id DESC LIMIT $2 OFFSET $3",
            SELECT_WITH_AUTHOR
        );
        let rows = sqlx::query_as::<_, PostAuthorRow>(&query)
            .bind(author_id)
            .bind(page.limit as i64)
            .bind(page.offset())
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().map(PostWithAuthor::from).collect())
    }

    /// Applies a partial update
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdatePost,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            UPDATE posts SET
                title = COALESCE($2, title),
                body_text = COALESCE($3, body_text),
                image_url = COALESCE($4, image_url),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, title, body_text, image_url, author_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(data.title)
        .bind(data.body_text)
        .bind(data.image_url)
        .fetch_optional(pool)
        .await
    }

    /// Deletes a post; returns true if it existed
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts posts by an author created at or after `since`
    pub async fn count_by_author_since(
        pool: &PgPool,
        author_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE author_id = $1 AND created_at >= $2",
        )
        .bind(author_id)
        .bind(since)
        .fetch_one(pool)
        .await
    }
}
