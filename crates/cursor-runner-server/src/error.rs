//! Maps [`cursor_runner_core::CoreError`] onto HTTP status codes (spec §7
//! "Propagation policy").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use cursor_runner_core::ids::generate_request_id;
use cursor_runner_core::CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    error_kind: &'static str,
    request_id: String,
    timestamp: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<String>,
}

/// Mirrors the teacher's convention of gating stack-trace-shaped detail
/// behind a dev flag rather than always including it (spec §7 "developer-mode
/// responses").
fn dev_mode() -> bool {
    std::env::var("DEV_MODE").map(|v| matches!(v.as_str(), "1" | "true")).unwrap_or(false)
}

/// Thin wrapper so handlers can `?`-propagate a [`CoreError`] straight into
/// an HTTP response. Every terminal error carries a `requestId` (spec §7
/// "Propagation policy"): handlers that already know the caller's request
/// id build one with [`ApiError::new`]; the blanket [`From<CoreError>`]
/// conversion (used by routes with no request-id concept of their own,
/// e.g. the conversation-store endpoints) mints a fresh diagnostic one.
pub struct ApiError {
    pub request_id: String,
    pub source: CoreError,
}

impl ApiError {
    pub fn new(request_id: impl Into<String>, source: CoreError) -> Self {
        Self { request_id: request_id.into(), source }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError { request_id: generate_request_id(), source: err }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.source {
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let debug = dev_mode().then(|| format!("{:?}", self.source));
        let body = ErrorBody {
            error: self.source.to_string(),
            error_kind: self.source.kind(),
            request_id: self.request_id,
            timestamp: Utc::now(),
            debug,
        };
        (status, Json(body)).into_response()
    }
}
