/// Post service
///
/// CRUD over posts with the authorization policy applied, plus the
/// collaborators a write touches:
///
/// - the quota gate, before a create
/// - object storage, for an attached image
/// - the search index, after every write
///
/// Search indexing is best effort. A failed upsert or delete is logged with
/// `warn!` and the write still succeeds. `reindex_all` repairs the index by
/// upserting every stored post.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::auth::authorization::{self, AuthzError, PostAction};
use crate::auth::middleware::AuthContext;
use crate::billing::quota::{QuotaEnforcer, QuotaError};
use crate::models::post::{CreatePost, PageRequest, Post, PostWithAuthor, UpdatePost};
use crate::search::{SearchDocument, SearchError, SearchIndex};
use crate::storage::{ImageUpload, ObjectStorage, StorageError};
use crate::store::{PostStore, StoreError};

/// Error type for post operations
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("Validation failed")]
    Validation(#[from] ValidationErrors),

    #[error("Post not found")]
    NotFound,

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    /// Quota gate denied the create
    #[error(transparent)]
    Quota(QuotaError),

    #[error("Search query is required")]
    EmptyQuery,

    /// Insert failed; the cause is logged, not exposed
    #[error("Failed to create post")]
    CreateFailed(#[source] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QuotaError> for PostError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Store(e) => PostError::Store(e),
            denied => PostError::Quota(denied),
        }
    }
}

/// Input for a new post
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewPostInput {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: String,

    pub body_text: Option<String>,

    #[serde(skip)]
    pub image: Option<ImageUpload>,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PostChanges {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: Option<String>,

    pub body_text: Option<String>,

    #[serde(skip)]
    pub image: Option<ImageUpload>,
}

/// Listing page with the window that produced it
#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub items: Vec<PostWithAuthor>,
    pub page: u32,
    pub limit: u32,
}

/// Outcome of a bulk reindex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PostService {
    posts: Arc<dyn PostStore>,
    quota: QuotaEnforcer,
    search: Arc<dyn SearchIndex>,
    storage: Arc<dyn ObjectStorage>,
    enforce_limits: bool,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostStore>,
        quota: QuotaEnforcer,
        search: Arc<dyn SearchIndex>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            posts,
            quota,
            search,
            storage,
            enforce_limits: true,
        }
    }

    /// Turns the subscription quota gate on or off
    pub fn with_limits(mut self, enforce: bool) -> Self {
        self.enforce_limits = enforce;
        self
    }

    async fn upload(&self, image: &ImageUpload) -> Result<String, PostError> {
        let path = image.object_path();
        Ok(self.storage.upload(&path, image).await?)
    }

    async fn reindex(&self, post: &Post) {
        if let Err(e) = self.search.index_post(post).await {
            warn!(post_id = %post.id, error = %e, "Search indexing failed");
        }
    }

    /// Creates a post owned by the caller
    pub async fn create(&self, auth: &AuthContext, input: NewPostInput) -> Result<Post, PostError> {
        input.validate()?;

        if self.enforce_limits {
            self.quota.enforce_post_quota(auth.user_id).await?;
        }

        let image_url = match &input.image {
            Some(image) => Some(self.upload(image).await?),
            None => None,
        };

        let post = self
            .posts
            .create_post(CreatePost {
                title: input.title.trim().to_string(),
                body_text: input.body_text,
                image_url,
                author_id: auth.user_id,
            })
            .await
            .map_err(|e| {
                error!(user_id = %auth.user_id, error = %e, "Post creation failed");
                PostError::CreateFailed(e)
            })?;

        self.reindex(&post).await;

        info!(post_id = %post.id, author_id = %post.author_id, "Post created");
        Ok(post)
    }

    /// Newest first; admins see every post, customers their own
    pub async fn list(&self, auth: &AuthContext, page: PageRequest) -> Result<PostPage, PostError> {
        let scope = authorization::list_scope(auth);
        let items = self.posts.list_posts(scope.author_filter(), page).await?;

        Ok(PostPage {
            items,
            page: page.page,
            limit: page.limit,
        })
    }

    pub async fn find(&self, id: Uuid) -> Result<PostWithAuthor, PostError> {
        self.posts
            .find_post_with_author(id)
            .await?
            .ok_or(PostError::NotFound)
    }

    /// Applies `changes`; only the author may update
    pub async fn update(
        &self,
        auth: &AuthContext,
        id: Uuid,
        changes: PostChanges,
    ) -> Result<Post, PostError> {
        changes.validate()?;

        let existing = self.posts.find_post(id).await?.ok_or(PostError::NotFound)?;
        authorization::require(auth, PostAction::Update, existing.author_id)?;

        let image_url = match &changes.image {
            Some(image) => Some(self.upload(image).await?),
            None => None,
        };

        let update = UpdatePost {
            title: changes.title.map(|t| t.trim().to_string()),
            body_text: changes.body_text,
            image_url,
        };
        if update.is_empty() {
            return Ok(existing);
        }

        let post = self
            .posts
            .update_post(id, update)
            .await?
            .ok_or(PostError::NotFound)?;

        self.reindex(&post).await;

        info!(post_id = %post.id, "Post updated");
        Ok(post)
    }

    /// Deletes a post; the author or an admin may delete
    pub async fn delete(&self, auth: &AuthContext, id: Uuid) -> Result<(), PostError> {
        let existing = self.posts.find_post(id).await?.ok_or(PostError::NotFound)?;
        authorization::require(auth, PostAction::Delete, existing.author_id)?;

        if !self.posts.delete_post(id).await? {
            return Err(PostError::NotFound);
        }

        if let Err(e) = self.search.delete_post(&id.to_string()).await {
            warn!(post_id = %id, error = %e, "Search de-indexing failed");
        }

        info!(post_id = %id, deleted_by = %auth.user_id, "Post deleted");
        Ok(())
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchDocument>, PostError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PostError::EmptyQuery);
        }
        Ok(self.search.search_posts(query).await?)
    }

    /// Upserts every stored post into the search index
    ///
    /// A post that fails to index is logged and counted; the pass carries on.
    /// Fails only if the collection cannot be ensured or the store errors.
    pub async fn reindex_all(&self) -> Result<ReindexReport, PostError> {
        self.reindex_in_pages(PageRequest::MAX_LIMIT).await
    }

    async fn reindex_in_pages(&self, limit: u32) -> Result<ReindexReport, PostError> {
        self.search.ensure_collection().await?;

        let mut report = ReindexReport::default();
        let mut page = PageRequest::new(Some(1), Some(limit));

        loop {
            let batch = self.posts.list_posts(None, page).await?;

            for entry in &batch {
                match self.search.index_post(&entry.post).await {
                    Ok(()) => report.indexed += 1,
                    Err(e) => {
                        warn!(post_id = %entry.post.id, error = %e, "Reindex failed for post");
                        report.failed += 1;
                    }
                }
            }

            if (batch.len() as u32) < page.limit {
                break;
            }
            page.page += 1;
        }

        info!(indexed = report.indexed, failed = report.failed, "Reindex complete");
        Ok(report)
    }
}
