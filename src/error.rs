use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy shared by the ingestion path, the worker and the store.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Rate limit exceeded")]
    RateLimited { remaining: u64 },

    #[error("{0}")]
    BadRequest(String),

    #[error("Request too old")]
    Stale,

    #[error("Invalid signature")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Store unavailable: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) | AppError::Stale => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AppError::RateLimited { remaining } => {
                let mut response =
                    (status, Json(json!({ "error": "Rate limit exceeded" }))).into_response();
                response.headers_mut().insert(
                    "X-RateLimit-Remaining",
                    HeaderValue::from(*remaining),
                );
                response
            }
            AppError::NotFound(message) => {
                (status, Json(json!({ "success": false, "message": message }))).into_response()
            }
            AppError::Store(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "Request failed with internal error");
                (status, Json(json!({ "error": "Internal server error" }))).into_response()
            }
            _ => (status, Json(json!({ "error": self.to_string() }))).into_response(),
        }
    }
}
