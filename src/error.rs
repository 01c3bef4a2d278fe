//! Error taxonomy surfaced at the HTTP boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or malformed bearer token")]
    Unauthorized,

    #[error("token failed validation: {0}")]
    InvalidToken(String),

    #[error("principal lacks permission for this operation")]
    Forbidden,

    #[error("request failed validation: {0}")]
    Validation(String),

    #[error("resource not found")]
    NotFound,

    #[error("message already present in the queue")]
    AlreadyQueued,

    #[error("authentication failed")]
    AuthFailed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::InvalidToken(_) => "INVALID_TOKEN",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::Validation(_) => "VALIDATION",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::AlreadyQueued => "ALREADY_QUEUED",
            ApiError::AuthFailed => "AUTH_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyQueued => StatusCode::CONFLICT,
            ApiError::AuthFailed => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<crate::queue::backend::DuplicateMessageId>().is_some() {
            return ApiError::AlreadyQueued;
        }
        ApiError::Internal(err.to_string())
    }
}
