//! Response mapping.
//!
//! Dispatch outcomes carry their own classification; this module only picks
//! the HTTP status for it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::orchestrator::{ErrorCode, OrchestrationResponse};

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidServiceType => StatusCode::BAD_REQUEST,
        ErrorCode::ServiceUnavailable | ErrorCode::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::RetryExhausted | ErrorCode::BackendError => StatusCode::BAD_GATEWAY,
        ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for OrchestrationResponse {
    fn into_response(self) -> Response {
        let status = match (self.success, self.error_code) {
            (true, _) => StatusCode::OK,
            (false, Some(code)) => status_for(code),
            (false, None) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Plain JSON error for requests rejected before dispatch.
pub fn bad_request(message: impl Into<String>) -> Response {
    let message = message.into();
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
