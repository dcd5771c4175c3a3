//! Problem-details error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quarry_engine::EngineError;
use quarry_protocol::http_types::ProblemDetails;

pub struct ApiError {
    pub status: StatusCode,
    pub problem: ProblemDetails,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>, request_id: &str) -> Self {
        Self {
            status,
            problem: ProblemDetails {
                error: status
                    .canonical_reason()
                    .unwrap_or("error")
                    .to_string(),
                code: code.to_string(),
                message: message.into(),
                details: None,
                request_id: request_id.to_string(),
            },
        }
    }

    pub fn from_engine(error: EngineError, request_id: &str) -> Self {
        let (status, code) = match &error {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::UnknownSource(_) => (StatusCode::NOT_FOUND, "unknown_source"),
            EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        };
        Self::new(status, code, error.to_string(), request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.problem)).into_response()
    }
}

/// Fresh correlation id for one request/response pair.
pub fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
