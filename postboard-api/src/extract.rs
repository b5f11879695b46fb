/// Request extractors that fail with `ApiError`
///
/// axum's own `Json`, `Path` and `Query` reject with plain-text bodies.
/// These wrappers route the rejection through `ApiError` so malformed input
/// gets the failure envelope and a 400.

use crate::error::ApiError;
use axum::extract::{FromRequest, FromRequestParts};

/// `axum::Json` with envelope rejections
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

/// `axum::extract::Path` with envelope rejections
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct AppPath<T>(pub T);

/// `axum::extract::Query` with envelope rejections
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct AppQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::post, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct Named {
        #[allow(dead_code)]
        name: String,
    }

    async fn named(AppJson(_): AppJson<Named>) -> &'static str {
        "ok"
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_json_rejections_use_envelope() {
        let app = Router::new().route("/", post(named));

        let cases = [
            (Some("application/json"), "{}"),
            (Some("application/json"), "{not json"),
            (None, r#"{"name":"x"}"#),
        ];
        for (content_type, body) in cases {
            let mut request = Request::builder().method("POST").uri("/");
            if let Some(content_type) = content_type {
                request = request.header("content-type", content_type);
            }
            let response = app
                .clone()
                .oneshot(request.body(Body::from(body)).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
            let json = body_json(response).await;
            assert_eq!(json["status"], false);
            assert_eq!(json["statusCode"], 400);
            assert_eq!(json["error"], "bad_request");
            assert!(!json["message"].as_str().unwrap().is_empty());
        }
    }
}
