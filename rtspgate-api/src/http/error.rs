// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rtspgate_core::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ConfigurationInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists | ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::EndpointUnreachable => StatusCode::BAD_GATEWAY,
        ErrorKind::PipelineStalled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert rtspgate_core errors to HTTP errors
impl From<rtspgate_core::Error> for AppError {
    fn from(err: rtspgate_core::Error) -> Self {
        let status = status_for(err.kind());
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "Internal error");
            return Self::internal_server_error("Internal server error");
        }
        Self::new(status, err.to_string())
    }
}

/// Convert anyhow errors to HTTP errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        Self::internal_server_error("Internal server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtspgate_core::Error;

    #[test]
    fn test_kind_to_status() {
        let cases = [
            (Error::ConfigurationInvalid(String::new()), StatusCode::BAD_REQUEST),
            (Error::NotFound(String::new()), StatusCode::NOT_FOUND),
            (Error::AlreadyExists(String::new()), StatusCode::CONFLICT),
            (Error::InvalidState(String::new()), StatusCode::CONFLICT),
            (Error::ResourceExhausted(String::new()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::EndpointUnreachable(String::new()), StatusCode::BAD_GATEWAY),
            (Error::PipelineStalled(String::new()), StatusCode::GATEWAY_TIMEOUT),
            (Error::Internal(String::new()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::from(Error::Internal("mutex poisoned at 0x1234".to_string()));
        assert_eq!(err.message, "Internal server error");
    }
}
