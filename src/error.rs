//! Error types for genbridge

use std::time::Duration;

use thiserror::Error;

/// Result type alias for genbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the workflow host.
///
/// Every failure of a generation call maps to exactly one of these kinds.
/// Only [`Error::Network`], [`Error::RateLimited`] and [`Error::ServerError`]
/// are retried by the transport.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No API key found for {provider}. Please provide via:\n  1. api_key parameter\n  2. {env_hint} environment variable\n  3. [{section}] api_key in {config_hint}")]
    NoCredential {
        provider: String,
        env_hint: String,
        section: String,
        config_hint: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Blocked by provider safety system ({category}): {detail}")]
    Blocked { category: String, detail: String },

    #[error("Context overflow: {tokens} estimated tokens + {reserved} reserved exceeds window of {window}")]
    ContextOverflow {
        tokens: usize,
        reserved: usize,
        window: usize,
    },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the retrying transport may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::RateLimited { .. } | Error::ServerError { .. }
        )
    }

    /// Provider-supplied delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    pub(crate) fn blocked(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Blocked {
            category: category.into(),
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Malformed(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}
