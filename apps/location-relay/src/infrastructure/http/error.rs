//! API error responses.
//!
//! Maps pipeline failures onto HTTP status codes with a small JSON error
//! body. Authentication failures are deliberately uniform so the response
//! never reveals whether a credential exists.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::services::IngestError;

/// An error surfaced to an HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Credential missing, malformed, or unknown.
    #[error("invalid or missing credentials")]
    Unauthenticated,

    /// Authenticated, but the request is not permitted.
    #[error("{0}")]
    Forbidden(String),

    /// Payload failed validation.
    #[error("{0}")]
    UnprocessableEntity(String),

    /// An upstream collaborator failed.
    #[error("{0}")]
    BadGateway(String),

    /// The service is shutting down.
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(e) => Self::UnprocessableEntity(e.to_string()),
            IngestError::NoTargetGroups => {
                Self::Forbidden("location sharing is not enabled for any group".to_string())
            }
            IngestError::Storage(e) => Self::BadGateway(e.to_string()),
            IngestError::Authorizer(e) => Self::BadGateway(e.to_string()),
            IngestError::Scheduler(e) => Self::ServiceUnavailable(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
