//! Exponential backoff with jitter
//!
//! One retry combinator shared by every provider call. Transient failures
//! are retried up to the attempt ceiling; a server-supplied retry-after hint
//! replaces the computed delay.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
    /// Whether to add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Create a policy for gentle retries (fewer attempts, shorter waits)
    pub fn gentle() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }

    /// Backoff after failed attempt `attempt` (1-based), without a server hint.
    ///
    /// `base * 2^(attempt-1)` plus jitter below half that step, capped at
    /// `max_delay`. Consecutive delays never decrease.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let step = self.base_delay.saturating_mul(1u32 << exp);
        let jitter = if self.jitter {
            let span = (step / 2).as_millis() as u64;
            if span > 0 {
                Duration::from_millis(rand::thread_rng().gen_range(0..span))
            } else {
                Duration::ZERO
            }
        } else {
            Duration::ZERO
        };
        (step + jitter).min(self.max_delay)
    }
}

/// Execute an async operation with retry logic
///
/// `operation` receives the 1-based attempt number. Errors for which
/// `is_retryable` returns false are returned at once. Cancellation is checked
/// before each attempt and races both the attempt and the backoff sleep.
pub async fn with_retry<F, Fut, T, P>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    is_retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(Error::Cancelled);
        }

        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                outcome = operation(attempt) => outcome,
            },
            None => operation(attempt).await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < max_attempts => {
                let wait = match e.retry_after() {
                    Some(hint) => {
                        debug!(hint_ms = hint.as_millis() as u64, "Using server retry-after hint");
                        hint
                    }
                    None => policy.delay_for_attempt(attempt),
                };

                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );

                match cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    },
                    None => tokio::time::sleep(wait).await,
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parse Retry-After header value
///
/// The header can be either:
/// - A number of seconds (e.g., "120")
/// - An HTTP date (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
    }

    if let Ok(date) = httpdate::parse_http_date(value) {
        let now = std::time::SystemTime::now();
        return Some(date.duration_since(now).unwrap_or(Duration::ZERO));
    }

    None
}

static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)s\s*$").unwrap());

static RETRY_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)\s*s").unwrap());

fn seconds(value: &str, pattern: &Regex) -> Option<Duration> {
    pattern
        .captures(value)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(Duration::from_secs_f64)
}

/// Extract a retry hint from an error body.
///
/// Understands Google's `RetryInfo` detail (`"retryDelay": "2s"`) and the
/// "Please retry in 2.5s" phrasing some providers put in the message.
pub fn retry_delay_from_body(body: &Value) -> Option<Duration> {
    let error = body.get("error").unwrap_or(body);

    if let Some(details) = error.get("details").and_then(Value::as_array) {
        for detail in details {
            if let Some(delay) = detail.get("retryDelay").and_then(Value::as_str) {
                if let Some(d) = seconds(delay, &SECONDS) {
                    return Some(d);
                }
            }
        }
    }

    error
        .get("message")
        .and_then(Value::as_str)
        .and_then(|m| seconds(m, &RETRY_IN))
}
