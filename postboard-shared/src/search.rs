/// Full-text search over posts
///
/// Search is a non-critical collaborator: the post service logs and swallows
/// indexing failures so a search outage never fails a write. Queries go to
/// the Typesense REST API; ranking is entirely the engine's business.
///
/// # Implementations
///
/// - [`TypesenseIndex`]: reqwest client against `/collections/{name}/...`
/// - [`DisabledSearchIndex`]: used when no Typesense URL is configured

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::post::Post;

/// Error type for search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search engine returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Indexed shape of a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub image_url: String,
    pub author_id: String,
    /// Milliseconds since the epoch, the default sort field
    pub created_at: i64,
}

impl From<&Post> for SearchDocument {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.to_string(),
            title: post.title.clone(),
            body_text: post.body_text.clone().unwrap_or_default(),
            image_url: post.image_url.clone().unwrap_or_default(),
            author_id: post.author_id.to_string(),
            created_at: post.created_at.timestamp_millis(),
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Creates the collection if it does not exist
    async fn ensure_collection(&self) -> Result<(), SearchError>;

    /// Inserts or replaces the post's document
    async fn index_post(&self, post: &Post) -> Result<(), SearchError>;

    /// Removes the post's document; a missing document is not an error
    async fn delete_post(&self, id: &str) -> Result<(), SearchError>;

    async fn search_posts(&self, query: &str) -> Result<Vec<SearchDocument>, SearchError>;
}

/// Typesense connection settings
#[derive(Clone)]
pub struct TypesenseConfig {
    pub url: String,
    pub api_key: String,
    pub collection: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl TypesenseConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            collection: "posts".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for TypesenseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypesenseConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("collection", &self.collection)
            .finish()
    }
}

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    document: SearchDocument,
}

pub struct TypesenseIndex {
    config: TypesenseConfig,
    client: reqwest::Client,
}

impl TypesenseIndex {
    pub fn new(config: TypesenseConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/collections/{}",
            self.config.url.trim_end_matches('/'),
            self.config.collection
        )
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "name": self.config.collection,
            "fields": [
                { "name": "title", "type": "string" },
                { "name": "bodyText", "type": "string", "optional": true },
                { "name": "imageUrl", "type": "string", "optional": true, "index": false },
                { "name": "authorId", "type": "string", "facet": true },
                { "name": "createdAt", "type": "int64" }
            ],
            "default_sorting_field": "createdAt"
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SearchIndex for TypesenseIndex {
    async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .get(self.collection_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::NOT_FOUND {
            Self::check(response).await?;
            debug!(collection = %self.config.collection, "Search collection exists");
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/collections", self.config.url.trim_end_matches('/')))
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&self.schema())
            .send()
            .await?;
        Self::check(response).await?;

        info!(collection = %self.config.collection, "Created search collection");
        Ok(())
    }

    async fn index_post(&self, post: &Post) -> Result<(), SearchError> {
        let response = self
            .client
            .post(format!("{}/documents", self.collection_url()))
            .query(&[("action", "upsert")])
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&SearchDocument::from(post))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_post(&self, id: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .delete(format!("{}/documents/{}", self.collection_url(), id))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn search_posts(&self, query: &str) -> Result<Vec<SearchDocument>, SearchError> {
        let response = self
            .client
            .get(format!("{}/documents/search", self.collection_url()))
            .query(&[("q", query), ("query_by", "title,bodyText")])
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        let results: SearchResponse = Self::check(response).await?.json().await?;
        Ok(results.hits.into_iter().map(|hit| hit.document).collect())
    }
}

/// No-op index: writes succeed silently, searches return nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearchIndex;

#[async_trait]
impl SearchIndex for DisabledSearchIndex {
    async fn ensure_collection(&self) -> Result<(), SearchError> {
        Ok(())
    }

    async fn index_post(&self, _post: &Post) -> Result<(), SearchError> {
        Ok(())
    }

    async fn delete_post(&self, _id: &str) -> Result<(), SearchError> {
        Ok(())
    }

    async fn search_posts(&self, _query: &str) -> Result<Vec<SearchDocument>, SearchError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_document_from_post() {
        let created_at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let post = Post {
            id: Uuid::new_v4(),
            title: "Hello".to_string(),
            body_text: None,
            image_url: Some("https://cdn/x.png".to_string()),
            author_id: Uuid::new_v4(),
            created_at,
            updated_at: created_at,
        };

        let doc = SearchDocument::from(&post);
        assert_eq!(doc.id, post.id.to_string());
        assert_eq!(doc.body_text, "");
        assert_eq!(doc.created_at, created_at.timestamp_millis());

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["imageUrl"], "https://cdn/x.png");
        assert!(json.get("authorId").is_some());
    }

    #[test]
    fn test_collection_url_and_redaction() {
        let index = TypesenseIndex::new(TypesenseConfig::new("http://localhost:8108/", "xyz")).unwrap();
        assert_eq!(index.collection_url(), "http://localhost:8108/collections/posts");
        assert_eq!(index.schema()["default_sorting_field"], "createdAt");

        let debug = format!("{:?}", index.config);
        assert!(!debug.contains("xyz"));
    }

    #[test]
    fn test_search_response_parsing() {
        let body = r#"{"found":1,"hits":[{"document":{"id":"1","title":"t","bodyText":"b","authorId":"a","createdAt":5}}]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.hits.len(), 1);
        assert_eq!(parsed.hits[0].document.image_url, "");
    }

    #[tokio::test]
    async fn test_disabled_index() {
        let index = DisabledSearchIndex;
        assert!(index.ensure_collection().await.is_ok());
        assert!(index.delete_post("1").await.is_ok());
        assert!(index.search_posts("anything").await.unwrap().is_empty());
    }
}
