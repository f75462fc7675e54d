//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;

use convoy_core::Error;

/// HTTP-facing wrapper over the protocol error taxonomy.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Book/take races are routine; the caller retries off its next
            // listing.
            Error::AlreadyBooked | Error::JobNotWaiting => StatusCode::CONFLICT,
            Error::InvalidToken => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::ArtifactUploadFailed(_) => StatusCode::BAD_REQUEST,
            Error::SpawnFailed(_) | Error::Storage(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if self.0.is_conflict() {
            debug!(error = %self.0, "conflict");
        }

        let body = Json(json!({
            "error": self.0.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(Error::InvalidInput(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError(Error::Forbidden(message.into()))
    }
}
