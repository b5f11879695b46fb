/// Post endpoints
///
/// Writes arrive as `multipart/form-data` with the text fields `title` and
/// `bodyText` and an optional `image` file part; any other part is a 400.
/// Reads are JSON.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{AppPath, AppQuery},
    response::ApiResponse,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Extension,
};
use postboard_shared::{
    auth::middleware::AuthContext,
    models::post::{PageRequest, Post, PostWithAuthor},
    posts::{NewPostInput, PostChanges, PostPage},
    search::SearchDocument,
    storage::ImageUpload,
};
use serde::Deserialize;
use uuid::Uuid;

/// Query parameters for `GET /posts`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Query parameters for `GET /posts/search`
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Fields collected from a post form
#[derive(Debug, Default)]
struct PostForm {
    title: Option<String>,
    body_text: Option<String>,
    image: Option<ImageUpload>,
}

async fn read_post_form(mut multipart: Multipart) -> ApiResult<PostForm> {
    let mut form = PostForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => {
                form.title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Invalid title: {}", e)))?,
                );
            }
            "bodyText" => {
                form.body_text = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Invalid bodyText: {}", e)))?,
                );
            }
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid image: {}", e)))?;

                // Browsers send an empty part when no file was picked
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                form.image = Some(ImageUpload::validate(&file_name, data)?);
            }
            other => {
                return Err(ApiError::BadRequest(format!(
                    "property {} should not exist",
                    other
                )))
            }
        }
    }

    Ok(form)
}

/// List posts visible to the caller
///
/// ADMIN sees every post, CUSTOMER only their own. Newest first.
pub async fn list_posts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppQuery(query): AppQuery<ListQuery>,
) -> ApiResult<ApiResponse<PostPage>> {
    let page = PageRequest::new(query.page, query.limit);
    let posts = state.posts.list(&auth, page).await?;
    Ok(ApiResponse::ok(posts))
}

/// Create a post
///
/// # Errors
///
/// - `400 Bad Request`: Missing title, bad image
/// - `403 Forbidden`: No active subscription, or post limit reached
/// - `503 Service Unavailable`: Image attached but storage not configured
pub async fn create_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<Post>> {
    let form = read_post_form(multipart?).await?;

    let input = NewPostInput {
        title: form.title.unwrap_or_default(),
        body_text: form.body_text,
        image: form.image,
    };

    let post = state.posts.create(&auth, input).await?;
    Ok(ApiResponse::created(post))
}

/// Fetch one post with its author
pub async fn get_post(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<ApiResponse<PostWithAuthor>> {
    let post = state.posts.find(id).await?;
    Ok(ApiResponse::ok(post))
}

/// Partially update a post (owner only)
pub async fn update_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(id): AppPath<Uuid>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<Post>> {
    let form = read_post_form(multipart?).await?;

    let changes = PostChanges {
        title: form.title,
        body_text: form.body_text,
        image: form.image,
    };

    let post = state.posts.update(&auth, id, changes).await?;
    Ok(ApiResponse::ok(post))
}

/// Delete a post (owner or ADMIN)
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    state.posts.delete(&auth, id).await?;
    Ok(ApiResponse::ok(serde_json::json!({
        "message": "Post deleted successfully"
    })))
}

/// Full-text search over titles and bodies
pub async fn search_posts(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SearchQuery>,
) -> ApiResult<ApiResponse<Vec<SearchDocument>>> {
    let hits = state.posts.search(&query.q).await?;
    Ok(ApiResponse::ok(hits))
}
