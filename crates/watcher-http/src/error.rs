use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

/// Every handler in this crate maps its fallible store/insights/topics call
/// through this, a per-handler `(StatusCode, Json<Value>)` error shape
/// rather than a single `IntoResponse` error type.
pub fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
}

pub fn bad_request(reason: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": reason.to_string() })))
}

pub fn not_found(reason: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": reason.to_string() })))
}
