//! Error handling module for the Pyxis client

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PyxisError {
    /// Invalid or contradictory caller configuration, raised before any request
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Connection/timeout failure that outlived the retry budget
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Http(HttpFailure),
    /// Successful response whose body does not have the expected shape
    #[error("Unexpected response: {0}")]
    Protocol(String),
    #[error("Input error: {0}")]
    Input(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Worker error: {0}")]
    Worker(String),
}

impl PyxisError {
    /// Status code of the failed response, if this error came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PyxisError::Http(failure) => Some(failure.status),
            PyxisError::Transport(err) => err.status(),
            _ => None,
        }
    }
}

/// A non-2xx response that no tolerance rule accepted.
///
/// The response body has already been consumed, so both the parsed JSON
/// (empty object when the body was not JSON) and the raw text are kept.
#[derive(Debug, Clone)]
pub struct HttpFailure {
    pub status: StatusCode,
    pub url: String,
    pub body: Value,
    pub text: String,
}

impl HttpFailure {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Standard summary line, e.g. `500 Server Error: Internal Server Error for url: ...`
    pub fn summary(&self) -> String {
        let kind = if self.status.is_client_error() {
            "Client Error"
        } else if self.status.is_server_error() {
            "Server Error"
        } else {
            "Error"
        };
        format!(
            "{} {}: {} for url: {}",
            self.status.as_u16(),
            kind,
            self.status.canonical_reason().unwrap_or("Unknown"),
            self.url
        )
    }

    /// `detail` field of the parsed body, falling back to the raw text.
    pub fn detail(&self) -> String {
        match self.body.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(detail) => detail.to_string(),
            None => self.text.clone(),
        }
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = self.detail();
        if detail.is_empty() {
            write!(f, "{}", self.summary())
        } else {
            write!(f, "{}: {}", self.summary(), detail)
        }
    }
}

pub type Result<T> = std::result::Result<T, PyxisError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failure(status: u16, body: Value, text: &str) -> HttpFailure {
        HttpFailure {
            status: StatusCode::from_u16(status).unwrap(),
            url: "https://pyxis.example.com/v1/signatures".to_string(),
            body,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_message_prefers_detail_field() {
        let err = PyxisError::Http(failure(
            400,
            json!({"detail": "bad filter", "status": 400}),
            r#"{"detail": "bad filter", "status": 400}"#,
        ));
        assert_eq!(
            err.to_string(),
            "400 Client Error: Bad Request for url: https://pyxis.example.com/v1/signatures: bad filter"
        );
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_message_falls_back_to_text() {
        let err = PyxisError::Http(failure(502, json!({}), "upstream went away"));
        assert!(err.to_string().starts_with("502 Server Error: Bad Gateway"));
        assert!(err.to_string().ends_with(": upstream went away"));
    }

    #[test]
    fn test_message_without_body() {
        let err = failure(500, json!({}), "");
        assert_eq!(
            err.to_string(),
            "500 Server Error: Internal Server Error for url: https://pyxis.example.com/v1/signatures"
        );
    }

    #[test]
    fn test_non_http_errors_have_no_status() {
        assert_eq!(PyxisError::Config("x".into()).status(), None);
    }
}
