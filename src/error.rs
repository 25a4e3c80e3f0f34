//! Error types
//!
//! Every failure in the request/poll/retry engine surfaces as an [`Error`].
//! Only the retry decorator decides whether an error is worth another attempt;
//! everything else just hands it upward.

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum Error {
    /// Target URL could not be parsed
    #[error("failed to parse url `{url}`: {source}")]
    UrlParse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Remote service answered with a status the operation does not accept
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Retry decorator used without a backoff or without error patterns
    #[error("retry is not configured: {0}")]
    NotConfigured(String),

    /// Body could not be encoded, or the response could not be decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Long-running operation finished in a failed state
    #[error(transparent)]
    Poll(#[from] PollError),

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Request could not be sent or the body could not be read
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Credential failed to produce a token
    #[error("failed to acquire access token: {0}")]
    Credential(String),

    /// Resource id or resource type string is malformed
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    /// A retry pattern failed to compile
    #[error("invalid retry pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// URL resolved to a service with no endpoint configuration
    #[error("no configuration for cloud service `{0}`")]
    UnknownService(String),

    /// Stored or supplied configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// A response whose status code the operation does not accept.
///
/// Carries the raw body so the caller can see what the service said; the
/// `Display` output includes it, which is what retry patterns match against.
#[derive(Debug, Clone)]
pub struct ResponseError {
    pub method: String,
    pub url: String,
    pub status: StatusCode,
    /// `error.code` from the body, or the `x-ms-error-code` header
    pub error_code: Option<String>,
    pub body: String,
}

impl ResponseError {
    pub(crate) fn new(
        method: &str,
        url: &str,
        status: StatusCode,
        header_code: Option<String>,
        body: String,
    ) -> Self {
        let error_code = header_code.or_else(|| error_code_from_body(&body));
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status,
            error_code,
            body,
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: unexpected status {}", self.method, self.url, self.status)?;
        if let Some(code) = &self.error_code {
            write!(f, ", error code {}", code)?;
        }
        if !self.body.is_empty() {
            write!(f, "\n{}", self.body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ResponseError {}

/// A long-running operation that reached a failed or canceled terminal state
#[derive(Debug, Clone)]
pub struct PollError {
    /// Terminal status reported by the service, e.g. `Failed`; empty when the
    /// status monitor answered without one
    pub status: String,
    /// Last payload returned by the status monitor
    pub payload: Option<Value>,
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status.is_empty() {
            write!(f, "long-running operation status response did not contain a status")?;
        } else {
            write!(f, "long-running operation finished with status {}", self.status)?;
        }
        if let Some(payload) = &self.payload {
            if let Some(error) = payload.get("error") {
                write!(f, ": {}", error)?;
            } else {
                write!(f, ": {}", payload)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PollError {}

/// Pull `error.code` (or a top-level `code`) out of an error body
fn error_code_from_body(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .or_else(|| value.get("code"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}
