//! HTTP utilities for data-plane REST calls

use crate::error::{Error, ResponseError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

pub(crate) const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A fully described request that can be sent more than once
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    /// Build a request with `api-version`, `Accept: application/json` and a
    /// fresh client request id. A body is only attached for non-GET methods.
    pub fn new(
        method: Method,
        raw_url: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Self> {
        let mut url = Url::parse(raw_url).map_err(|source| Error::UrlParse {
            url: raw_url.to_string(),
            source,
        })?;
        set_api_version(&mut url, api_version);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(id) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            headers.insert(CLIENT_REQUEST_ID, id);
        }

        let body = match body {
            Some(body) if method != Method::GET => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(serde_json::to_vec(body)?)
            }
            _ => None,
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    /// Bare GET against an absolute URL (status polls, final resource reads)
    pub fn get(url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(id) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            headers.insert(CLIENT_REQUEST_ID, id);
        }
        Self {
            method: Method::GET,
            url,
            headers,
            body: None,
        }
    }
}

/// Replace any existing `api-version` with the given one
fn set_api_version(url: &mut Url, api_version: &str) {
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "api-version")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &others {
        pairs.append_pair(k, v);
    }
    pairs.append_pair("api-version", api_version);
}

/// A response whose body has been read
#[derive(Debug, Clone)]
pub(crate) struct ReceivedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ReceivedResponse {
    pub async fn read(response: Response) -> std::result::Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).unwrap_or_default()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded per `Content-Type`
    pub fn payload(&self) -> Result<Option<Value>> {
        decode_payload(self.content_type(), &self.body)
    }

    /// Body as JSON regardless of `Content-Type` (status monitors)
    pub fn json(&self) -> Result<Option<Value>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.body)?))
    }
}

/// Check the status against the operation's accepted set
pub(crate) fn ensure_status(
    method: &Method,
    url: &Url,
    response: &ReceivedResponse,
    accepted: &[StatusCode],
) -> Result<()> {
    if accepted.contains(&response.status) {
        return Ok(());
    }

    let body = response.body_text();
    // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
    tracing::error!(
        "API error: {} {} - {} - {}",
        method,
        url,
        response.status,
        sanitize_for_log(&body)
    );

    Err(ResponseError::new(
        method.as_str(),
        url.as_str(),
        response.status,
        response.header(ERROR_CODE_HEADER).map(|s| s.to_string()),
        body,
    )
    .into())
}

/// Decode a body by content type: JSON, plain text, or nothing
pub fn decode_payload(content_type: &str, body: &[u8]) -> Result<Option<Value>> {
    let content_type = content_type.to_ascii_lowercase();

    if content_type.contains("application/json") {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        return Ok(Some(serde_json::from_slice(body)?));
    }
    if content_type.contains("text/plain") {
        return Ok(Some(Value::String(String::from_utf8_lossy(body).into_owned())));
    }
    Ok(None)
}

/// Delay requested by the service via `retry-after-ms`, `x-ms-retry-after-ms`
/// or `Retry-After` (seconds or HTTP date)
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    wait.to_std().ok()
}
