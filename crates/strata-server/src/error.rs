//! API error types and Axum error response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API-level error that converts to an Axum response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("not found")]
    NotFound,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<strata_core::Error> for ApiError {
    fn from(e: strata_core::Error) -> Self {
        if e.is_reported() {
            ApiError::BadRequest {
                message: e.to_string(),
            }
        } else {
            ApiError::Internal {
                message: e.to_string(),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest { message } => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": message })),
            )
                .into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal { message } => {
                tracing::error!("lookup failed: {}", message);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
