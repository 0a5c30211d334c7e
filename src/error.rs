use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::upstream::UpstreamError;

pub const RATE_LIMIT_MESSAGE: &str =
    "Rate limit exceeded. Try another model or wait before retrying.";
pub const AUTH_MESSAGE: &str = "Invalid API key. Check your OpenRouter key.";
pub const BAD_REQUEST_MESSAGE: &str = "Invalid request. Check the model or the parameters.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    RateLimit,
    BadRequest,
    Unknown,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error returned by the completion endpoint before the event stream starts.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
}

/// JSON body of every non-streaming error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unknown(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Unknown, format!("Server error: {detail}"))
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status { status, message } => match status.as_u16() {
                429 => Self::new(ErrorKind::RateLimit, RATE_LIMIT_MESSAGE),
                401 => Self::new(ErrorKind::Auth, AUTH_MESSAGE),
                400 => Self::new(ErrorKind::BadRequest, BAD_REQUEST_MESSAGE),
                _ => Self::unknown(message),
            },
            other => Self::unknown(other),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
