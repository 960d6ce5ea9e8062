use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::publisher::PublisherError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("location permission denied")]
    PermissionDenied,

    #[error("tracking unavailable: {0}")]
    TrackingUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PublisherError> for AppError {
    fn from(err: PublisherError) -> Self {
        match err {
            PublisherError::PermissionDenied => AppError::PermissionDenied,
            PublisherError::InitialFix(source) => {
                AppError::TrackingUnavailable(format!("no position available: {source}"))
            }
            PublisherError::Store(source) => AppError::Internal(source.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                "location permission denied".to_string(),
            ),
            AppError::TrackingUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
