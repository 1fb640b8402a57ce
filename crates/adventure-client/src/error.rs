//! Client error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid session identifier")]
    InvalidSession,

    #[error("no session identifier in generate response")]
    MissingSessionId,

    #[error("prompt is required")]
    EmptyPrompt,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Request(String),

    #[error("response read failed: {0}")]
    Read(String),

    #[error("http {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("another generation is already being started")]
    GenerationInFlight,

    #[error("malformed JSON body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Build an HTTP error from a status and raw response body.
pub fn format_http_error(status: StatusCode, body: &[u8]) -> ClientError {
    let body = String::from_utf8_lossy(body);
    let trimmed = body.trim();
    let body = if trimmed.is_empty() {
        "<empty>".to_string()
    } else {
        trimmed.to_string()
    };
    ClientError::Http { status, body }
}
