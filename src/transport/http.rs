//! reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::retry::parse_retry_after;
use super::sse::SseDecoder;
use super::{Method, Transport, WireBody, WireRequest, WireResponse};
use crate::error::{Error, Result};

/// Default per-request timeout. Image generation can be slow.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (custom proxies, TLS roots).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = if request.stream && response.status().is_success() {
            let mut decoder = SseDecoder::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                decoder.feed(&chunk?);
            }
            WireBody::Events(decoder.finish())
        } else {
            let text = response.text().await?;
            match serde_json::from_str::<Value>(&text) {
                Ok(json) => WireBody::Json(json),
                Err(_) => WireBody::Text(text),
            }
        };

        debug!(status, ?retry_after, "HTTP exchange complete");
        Ok(WireResponse {
            status,
            retry_after,
            body,
        })
    }
}
