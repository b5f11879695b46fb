/// Success envelope
///
/// Every successful JSON response is wrapped as
/// `{status: true, statusCode, message: "Success", data, timestamp}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::timestamp;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status: bool,
    status_code: u16,
    message: &'static str,
    data: T,
    timestamp: String,
}

/// Successful response carrying `data`
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 OK
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    /// 201 Created
    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            status: true,
            status_code: self.status.as_u16(),
            message: "Success",
            data: self.data,
            timestamp: timestamp(),
        };
        (self.status, Json(body)).into_response()
    }
}
