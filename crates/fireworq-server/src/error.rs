//! HTTP error → status code mapping. Grounded on
//! the Go fireworq daemon's `web/error.go`'s `clientError`/`serverError` split
//! and `web/handler.go`'s translation of a handler's returned `error`
//! into a response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fireworq_core::StoreError;
use fireworq_service::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("not implemented by this queue's driver")]
    NotImplemented,
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::NotImplemented => (StatusCode::NOT_IMPLEMENTED, "not implemented".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NoRouting(_) | ServiceError::UndefinedQueue(_) => ApiError::NotFound(e.to_string()),
            ServiceError::Store(e) => e.into(),
            ServiceError::Repository(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::NotImplemented => ApiError::NotImplemented,
            StoreError::Inactive => ApiError::NotFound("queue is not active on this node".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
