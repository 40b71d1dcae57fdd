pub mod downloads;
pub mod health;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use vidgrab_core::Error;

/// Error body shared by every endpoint: `{"success": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found")
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidSource(_) | Error::InvalidQuality(_) => StatusCode::BAD_REQUEST,
            Error::ResolutionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::AlreadyRunning(_) => StatusCode::CONFLICT,
            Error::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Serialization failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "An error occurred")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_status_codes() {
        let cases = [
            (Error::InvalidSource("x".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidQuality("720".into()), StatusCode::BAD_REQUEST),
            (Error::ResolutionFailed("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::AlreadyRunning("id".into()), StatusCode::CONFLICT),
            (Error::CapacityExceeded(4), StatusCode::TOO_MANY_REQUESTS),
            (Error::NotFound("id".into()), StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
