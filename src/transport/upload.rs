//! Media upload collaborator.
//!
//! Some task APIs only accept image URLs. Inline image bytes are uploaded
//! first and the returned download URL goes into the request payload.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::http::HttpTransport;
use super::retry::{parse_retry_after, with_retry, RetryPolicy};
use super::{classify, WireBody, WireResponse};
use crate::auth::ApiKey;
use crate::error::{Error, Result};

const UPLOAD_PATH: &str = "/api/v2/media/upload/binary";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Turns image bytes into a URL a provider can fetch.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(
        &self,
        data: &[u8],
        mime_type: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<String>;
}

/// Uploads through WaveSpeed's binary media endpoint.
pub struct WaveSpeedUploader {
    http: HttpTransport,
    base_url: String,
    api_key: ApiKey,
    policy: RetryPolicy,
}

impl WaveSpeedUploader {
    pub fn new(http: HttpTransport, base_url: impl Into<String>, api_key: ApiKey, policy: RetryPolicy) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            policy,
        }
    }

    async fn upload_once(&self, data: &[u8], mime_type: &str) -> Result<String> {
        let extension = mime_type.rsplit('/').next().unwrap_or("png");
        let part = Part::bytes(data.to_vec())
            .file_name(format!("image.{}", extension))
            .mime_str(mime_type)
            .map_err(|e| Error::validation(format!("invalid MIME type {}: {}", mime_type, e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .client()
            .post(format!("{}{}", self.base_url, UPLOAD_PATH))
            .bearer_auth(self.api_key.expose())
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await?;
        let body = match serde_json::from_str::<Value>(&text) {
            Ok(json) => WireBody::Json(json),
            Err(_) => WireBody::Text(text),
        };

        let json = classify(WireResponse {
            status,
            retry_after,
            body,
        })?
        .into_json()?;
        download_url(&json)
    }
}

/// Pull `data.download_url` out of a `{code, message, data}` envelope.
pub(crate) fn download_url(json: &Value) -> Result<String> {
    if let Some(code) = json.get("code").and_then(Value::as_u64) {
        if code != 200 {
            let message = json
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            return Err(Error::validation(format!("upload rejected ({}): {}", code, message)));
        }
    }
    json.get("data")
        .and_then(|d| d.get("download_url"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::malformed("no download_url in upload response"))
}

#[async_trait]
impl MediaUploader for WaveSpeedUploader {
    async fn upload(
        &self,
        data: &[u8],
        mime_type: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        debug!(bytes = data.len(), mime_type, "Uploading media");
        let url = with_retry(&self.policy, cancel, Error::is_retryable, |_| {
            self.upload_once(data, mime_type)
        })
        .await?;
        info!("Media uploaded");
        Ok(url)
    }
}
