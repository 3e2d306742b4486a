// Error types for chatbridge gateway
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Model is not accessible: {0}")]
    ModelNotAccessible(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream socket error: {0}")]
    Socket(String),

    /// Upstream declined to produce an image; carries the upstream text.
    #[error("{0}")]
    ContentPolicyViolation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Convert ProxyError to OpenAI-style HTTP error responses for Axum
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match self {
            ProxyError::Unauthorized(_) => {
                (StatusCode::UNAUTHORIZED, "invalid_request_error", "invalid_api_key")
            }
            ProxyError::ModelNotAccessible(_) => {
                (StatusCode::NOT_FOUND, "invalid_request_error", "model_not_found")
            }
            ProxyError::ContentPolicyViolation(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "content_policy_violation",
            ),
            ProxyError::InvalidRequest(_) | ProxyError::Json(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_request")
            }
            ProxyError::Upstream(_) | ProxyError::Socket(_) | ProxyError::Http(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error", "upstream_error")
            }
            ProxyError::Config(_) | ProxyError::ConfigParsing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "configuration_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal_error"),
        };

        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "param": null,
                "code": code,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
