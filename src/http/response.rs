//! JSON response envelopes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";
pub const RESOURCE_NOT_FOUND: &str = "Resource not found";
pub const BAD_REQUEST: &str = "Bad request";

/// `{"success": false, "error": ..., "message": ...}` with the given status.
pub fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    let body = json!({
        "success": false,
        "error": error,
        "message": message.into(),
    });
    (status, Json(body)).into_response()
}

/// `{"success": true, "data": ...}` with the given status.
pub fn success_response<T: serde::Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}
