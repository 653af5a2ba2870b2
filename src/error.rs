//! Error types shared by the proxy surface.
//!
//! Handler failures render as an OpenAI-style envelope so chat clients can
//! surface them the same way they surface upstream errors:
//! `{"error": {"message": ..., "type": ..., "code": ...}}`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("internal proxy error: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid proxy mode {0:?} (expected \"azure\" or \"openai\")")]
    InvalidProxyMode(String),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    error_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

/// Build a JSON error response in the envelope shape used by this proxy.
pub fn error_envelope(
    status: StatusCode,
    message: &str,
    error_type: &str,
    code: Option<&str>,
) -> HttpResponse {
    HttpResponse::build(status).json(ErrorEnvelope {
        error: ErrorBody {
            message,
            error_type,
            code,
        },
    })
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::Upstream(_) | ProxyError::Internal(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ProxyError::NotFound { .. } => error_envelope(
                StatusCode::NOT_FOUND,
                "Not found",
                "invalid_request_error",
                None,
            ),
            // Upstream detail stays in the logs; clients get a stable message.
            ProxyError::Upstream(_) | ProxyError::Internal(_) => error_envelope(
                StatusCode::BAD_GATEWAY,
                "Internal proxy error",
                "proxy_error",
                Some("internal_error"),
            ),
        }
    }
}
