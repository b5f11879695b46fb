/// Health check endpoint
///
/// Reports that the server is up and whether Postgres answers.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": true,
///   "statusCode": 200,
///   "message": "Success",
///   "data": {
///     "status": "healthy",
///     "version": "0.1.0",
///     "database": "connected"
///   },
///   "timestamp": "2025-01-01T00:00:00.000Z"
/// }
/// ```
///
/// `database` is `not_configured` when the server runs on the in-memory store.

use crate::{app::AppState, error::ApiResult, response::ApiResponse};
use axum::extract::State;
use postboard_shared::db::pool;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Application version
    pub version: String,

    /// Database status
    pub database: String,
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> ApiResult<ApiResponse<HealthResponse>> {
    let database_status = match &state.db {
        Some(db) => match pool::health_check(db).await {
            Ok(()) => "connected",
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                "disconnected"
            }
        },
        None => "not_configured",
    };

    Ok(ApiResponse::ok(HealthResponse {
        status: if database_status == "disconnected" {
            "degraded".to_string()
        } else {
            "healthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database_status.to_string(),
    }))
}
