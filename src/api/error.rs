use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::engine::{EngineError, PreflightError};
use crate::extract::ExtractError;
use crate::media::IntakeError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("file is gone: {0}")]
    Gone(String),
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("range not satisfiable for size {0}")]
    RangeNotSatisfiable(u64),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidTransition(_) => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::NotReady(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::InvalidTransition(_) => "INVALID_TRANSITION",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Gone(_) => "GONE",
            ApiError::NotReady(_) => "NOT_READY",
            ApiError::RangeNotSatisfiable(_) => "RANGE_NOT_SATISFIABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        // 416 must carry the current representation size
        if let ApiError::RangeNotSatisfiable(size) = &self {
            return (
                status,
                [(axum::http::header::CONTENT_RANGE, format!("bytes */{size}"))],
                Json(json!(body)),
            )
                .into_response();
        }

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Validation(e) => ApiError::InvalidPayload(e.to_string()),
            EngineError::Preflight(PreflightError::PathEscapesRoot { .. }) => {
                ApiError::Forbidden("file path is not inside the storage root".into())
            }
            EngineError::Preflight(e) => ApiError::InvalidPayload(e.to_string()),
            EngineError::NotFound(id) => ApiError::NotFound(id),
            EngineError::InvalidTransition { .. } => ApiError::InvalidTransition(value.to_string()),
            EngineError::Extract(ExtractError::NotFound(m)) => ApiError::NotFound(m),
            EngineError::Extract(ExtractError::AuthRequired(m)) => {
                ApiError::InvalidPayload(format!("authentication required: {m}"))
            }
            EngineError::Extract(ExtractError::Unplayable(m)) => {
                ApiError::InvalidPayload(format!("source is not playable: {m}"))
            }
            EngineError::Extract(e) => ApiError::Internal(e.to_string()),
            EngineError::Store(e) => ApiError::Internal(e.to_string()),
            EngineError::Transcode(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(value: IntakeError) -> Self {
        match value {
            IntakeError::Validation(e) => ApiError::InvalidPayload(e.to_string()),
            IntakeError::Preflight(e) => ApiError::InvalidPayload(e.to_string()),
            IntakeError::Store(e) => ApiError::Internal(e.to_string()),
            IntakeError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(value: crate::store::StoreError) -> Self {
        ApiError::Internal(value.to_string())
    }
}
