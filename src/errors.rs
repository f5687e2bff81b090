use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

/// Failure of a single upstream fetch (CWMS, weather.gov, or our own `/api/*`
/// endpoints when revalidating through the base URL).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream returned HTTP {0}")]
    Http(u16),

    #[error("malformed upstream response: {0}")]
    Malformed(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The source answered with its estimated fallback instead of upstream data.
    #[error("upstream unavailable, estimate served")]
    Estimated,
}

/// Serializable classification of an [`UpstreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum UpstreamErrorKind {
    UpstreamTimeout,
    UpstreamHttpError,
    UpstreamMalformedResponse,
    NetworkUnavailable,
    UpstreamEstimated,
}

impl UpstreamError {
    pub fn kind(&self) -> UpstreamErrorKind {
        match self {
            UpstreamError::Timeout(_) => UpstreamErrorKind::UpstreamTimeout,
            UpstreamError::Http(_) => UpstreamErrorKind::UpstreamHttpError,
            UpstreamError::Malformed(_) => UpstreamErrorKind::UpstreamMalformedResponse,
            UpstreamError::NetworkUnavailable(_) => UpstreamErrorKind::NetworkUnavailable,
            UpstreamError::Estimated => UpstreamErrorKind::UpstreamEstimated,
        }
    }

    /// Classify a reqwest failure. `timeout` is the limit the request ran under.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            UpstreamError::Http(status.as_u16())
        } else if err.is_decode() {
            UpstreamError::Malformed(err.to_string())
        } else {
            UpstreamError::NetworkUnavailable(err.to_string())
        }
    }
}

/// Error as exposed in the dashboard view model.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UpstreamErrorBody {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl From<&UpstreamError> for UpstreamErrorBody {
    fn from(err: &UpstreamError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
