//! HTTP transport layer
//!
//! This module provides:
//! - [`WireRequest`] / [`WireResponse`], the provider-neutral HTTP exchange
//! - [`Transport`] trait for swappable senders ([`HttpTransport`] in production)
//! - [`RetryingTransport`], which classifies status codes into [`Error`] kinds
//!   and retries transient ones through [`with_retry`]
//! - [`MediaUploader`] for providers that need images as URLs

mod http;
mod retry;
pub mod sse;
mod upload;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

pub use http::HttpTransport;
pub use retry::{parse_retry_after, retry_delay_from_body, with_retry, RetryPolicy};
pub use upload::{MediaUploader, WaveSpeedUploader};

/// Headers whose values are never printed.
const SECRET_HEADERS: &[&str] = &["authorization", "x-api-key", "x-goog-api-key"];

/// Longest error body excerpt carried into an error message.
const MAX_ERROR_EXCERPT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One HTTP request as built by a provider adapter.
#[derive(Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Read the body as server-sent events
    pub stream: bool,
    pub timeout: Option<Duration>,
}

impl WireRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
            stream: false,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            stream: false,
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let secret = SECRET_HEADERS.iter().any(|s| k.eq_ignore_ascii_case(s));
                (k.as_str(), if secret { "[REDACTED]" } else { v.as_str() })
            })
            .collect();
        f.debug_struct("WireRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("stream", &self.stream)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Response body in the shape the adapter needs.
#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Json(Value),
    /// Payloads of every SSE `data:` line, in order
    Events(Vec<Value>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
    pub body: WireBody,
}

impl WireResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            retry_after: None,
            body: WireBody::Json(body),
        }
    }

    pub fn events(status: u16, events: Vec<Value>) -> Self {
        Self {
            status,
            retry_after: None,
            body: WireBody::Events(events),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// JSON body, or `Malformed` for any other body shape.
    pub fn into_json(self) -> Result<Value> {
        match self.body {
            WireBody::Json(value) => Ok(value),
            WireBody::Events(_) => Err(Error::malformed("expected a JSON body, got an event stream")),
            WireBody::Text(text) => Err(Error::malformed(format!(
                "expected a JSON body, got: {}",
                excerpt(&text)
            ))),
        }
    }
}

/// Sends one HTTP request. Implementations report connection-level failures
/// as `Error::Network` and hand back every HTTP status unclassified.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse>;
}

fn excerpt(text: &str) -> String {
    if text.len() <= MAX_ERROR_EXCERPT {
        return text.to_string();
    }
    let mut end = MAX_ERROR_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Best human-readable message in an error body, else the status reason.
fn error_message(status: u16, body: &WireBody) -> String {
    let found = match body {
        WireBody::Json(value) => {
            let error = value.get("error").unwrap_or(value);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .filter(|m| !m.trim().is_empty());
            match message {
                Some(message) => Some(message.to_string()),
                None if is_blank_json(value) => None,
                None => Some(excerpt(&value.to_string())),
            }
        }
        WireBody::Events(events) if !events.is_empty() => {
            Some(excerpt(&Value::from(events.clone()).to_string()))
        }
        WireBody::Events(_) => None,
        WireBody::Text(text) => (!text.trim().is_empty()).then(|| excerpt(text.trim())),
    };
    found.unwrap_or_else(|| status_reason(status))
}

fn is_blank_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().all(is_blank_json),
        _ => false,
    }
}

fn status_reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Error category named in the body, if the provider supplies one.
fn error_category(body: &WireBody) -> Option<String> {
    let WireBody::Json(value) = body else {
        return None;
    };
    let error = value.get("error")?;
    error
        .get("type")
        .or_else(|| error.get("status"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map an HTTP status to success or a typed error.
pub fn classify(response: WireResponse) -> Result<WireResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let status = response.status;
    let message = error_message(status, &response.body);
    Err(match status {
        429 => {
            let body_hint = match &response.body {
                WireBody::Json(value) => retry_delay_from_body(value),
                _ => None,
            };
            Error::RateLimited {
                message,
                retry_after: response.retry_after.or(body_hint),
            }
        }
        408 => Error::Network(format!("request timeout: {}", message)),
        401 => Error::Auth(message),
        403 => Error::blocked(
            error_category(&response.body).unwrap_or_else(|| "forbidden".to_string()),
            message,
        ),
        400..=499 => Error::Validation(format!("HTTP {}: {}", status, message)),
        500..=599 => Error::ServerError { status, message },
        _ => Error::malformed(format!("unexpected HTTP status {}: {}", status, message)),
    })
}

/// Runs requests through a [`Transport`] with classification and retries.
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute one logical call, retrying transient failures.
    pub async fn execute(
        &self,
        request: &WireRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<WireResponse> {
        self.execute_with(request, cancel, Ok).await
    }

    /// Like [`execute`](Self::execute), but `interpret` runs on every
    /// successful response inside the retry loop. A transient error it
    /// returns (an overload event in the middle of a stream, say) resends
    /// the request.
    pub async fn execute_with<T, F>(
        &self,
        request: &WireRequest,
        cancel: Option<&CancellationToken>,
        interpret: F,
    ) -> Result<T>
    where
        F: Fn(WireResponse) -> Result<T>,
    {
        let interpret = &interpret;
        with_retry(&self.policy, cancel, Error::is_retryable, |attempt| async move {
            debug!(attempt, method = ?request.method, url = %request.url, stream = request.stream, "Sending request");
            let response = self.inner.send(request).await?;
            debug!(attempt, status = response.status, "Received response");
            interpret(classify(response)?)
        })
        .await
    }
}

impl fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
