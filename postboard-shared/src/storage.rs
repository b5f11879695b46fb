/// Object storage for post images
///
/// Images are validated here, before any bytes leave the process: only
/// jpg/jpeg/png/gif, at most [`MAX_IMAGE_BYTES`]. Uploads go to a Supabase
/// Storage bucket and are referenced by their public URL.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Largest accepted image (5 MB)
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No storage backend is configured
    #[error("Image storage is not configured")]
    NotConfigured,

    /// File rejected before upload
    #[error("{0}")]
    InvalidImage(String),

    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Storage returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Validated image ready for upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// Lowercased extension without the dot
    pub extension: String,
    pub content_type: String,
    pub data: Bytes,
}

impl ImageUpload {
    /// Checks extension and size of an uploaded file
    ///
    /// The content type is derived from the extension so a client cannot
    /// label a script as an image.
    pub fn validate(file_name: &str, data: Bytes) -> Result<Self, StorageError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| {
                StorageError::InvalidImage(
                    "Only jpg, jpeg, png and gif images are allowed".to_string(),
                )
            })?;

        if data.is_empty() {
            return Err(StorageError::InvalidImage("Image file is empty".to_string()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(StorageError::InvalidImage(
                "Image must be at most 5 MB".to_string(),
            ));
        }

        let content_type = match extension.as_str() {
            "png" => "image/png",
            "gif" => "image/gif",
            _ => "image/jpeg",
        }
        .to_string();

        Ok(Self {
            extension,
            content_type,
            data,
        })
    }

    /// Fresh object key under `posts/`
    pub fn object_path(&self) -> String {
        format!("posts/{}.{}", Uuid::new_v4(), self.extension)
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores the bytes at `path` and returns their public URL
    async fn upload(&self, path: &str, image: &ImageUpload) -> Result<String, StorageError>;
}

/// Supabase Storage settings
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub bucket: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl SupabaseConfig {
    pub fn new(
        url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            bucket: bucket.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_key", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .finish()
    }
}

pub struct SupabaseStorage {
    config: SupabaseConfig,
    client: reqwest::Client,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    fn base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base(), self.config.bucket, path)
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base(),
            self.config.bucket,
            path
        )
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn upload(&self, path: &str, image: &ImageUpload) -> Result<String, StorageError> {
        let response = self
            .client
            .post(self.object_url(path))
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header(reqwest::header::CONTENT_TYPE, &image.content_type)
            .header("x-upsert", "false")
            .body(image.data.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(path, bytes = image.data.len(), "Uploaded image");
        Ok(self.public_url(path))
    }
}

/// Rejects every upload with [`StorageError::NotConfigured`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStorage;

#[async_trait]
impl ObjectStorage for DisabledStorage {
    async fn upload(&self, _path: &str, _image: &ImageUpload) -> Result<String, StorageError> {
        Err(StorageError::NotConfigured)
    }
}
