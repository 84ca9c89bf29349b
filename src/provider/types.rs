//! Normalised request and result types shared by every adapter.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::usage::Usage;

/// An input image: inline bytes or a URL the provider can fetch.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageInput {
    Inline { data: Vec<u8>, mime_type: String },
    Url(String),
}

impl ImageInput {
    /// Inline image, MIME type sniffed from the magic bytes (PNG if unknown).
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = sniff_mime(&data).to_string();
        Self::Inline { data, mime_type }
    }

    pub fn inline(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self::Inline {
            data,
            mime_type: mime_type.into(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// Decode a base64 payload (with or without a `data:` URL prefix).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let (mime, payload) = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| Error::validation("data URL without a payload"))?;
                (meta.strip_suffix(";base64").map(str::to_string), payload)
            }
            None => (None, encoded),
        };
        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::validation(format!("invalid base64 image: {}", e)))?;
        Ok(match mime {
            Some(mime_type) => Self::Inline { data, mime_type },
            None => Self::from_bytes(data),
        })
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Inline { mime_type, .. } => Some(mime_type),
            Self::Url(_) => None,
        }
    }

    /// Base64 of inline data.
    pub fn to_base64(&self) -> Option<String> {
        match self {
            Self::Inline { data, .. } => Some(STANDARD.encode(data)),
            Self::Url(_) => None,
        }
    }
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { data, mime_type } => f
                .debug_struct("Inline")
                .field("mime_type", mime_type)
                .field("bytes", &data.len())
                .finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// MIME type from leading magic bytes.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/png",
    }
}

/// An image produced by a provider.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImageOutput {
    Inline {
        #[serde(skip)]
        data: Vec<u8>,
        mime_type: String,
    },
    Url { url: String },
}

impl ImageOutput {
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url { url } => Some(url),
            Self::Inline { .. } => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Inline { data, .. } => Some(data),
            Self::Url { .. } => None,
        }
    }
}

impl fmt::Debug for ImageOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { data, mime_type } => f
                .debug_struct("Inline")
                .field("mime_type", mime_type)
                .field("bytes", &data.len())
                .finish(),
            Self::Url { url } => f.debug_struct("Url").field("url", url).finish(),
        }
    }
}

/// Harm-block threshold for one safety category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Threshold {
    None,
    Low,
    #[default]
    Medium,
    High,
}

impl Threshold {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Threshold::None => "BLOCK_NONE",
            Threshold::Low => "BLOCK_LOW_AND_ABOVE",
            Threshold::Medium => "BLOCK_MEDIUM_AND_ABOVE",
            Threshold::High => "BLOCK_ONLY_HIGH",
        }
    }
}

impl FromStr for Threshold {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Threshold::None),
            "low" => Ok(Threshold::Low),
            "medium" => Ok(Threshold::Medium),
            "high" => Ok(Threshold::High),
            other => Err(Error::validation(format!(
                "unknown safety threshold '{}' (expected none, low, medium or high)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyPreset {
    Strict,
    Balanced,
    Permissive,
}

impl FromStr for SafetyPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SafetyPreset::Strict),
            "balanced" => Ok(SafetyPreset::Balanced),
            "permissive" => Ok(SafetyPreset::Permissive),
            other => Err(Error::validation(format!("unknown safety preset '{}'", other))),
        }
    }
}

/// Per-category harm thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySettings {
    pub harassment: Threshold,
    pub hate_speech: Threshold,
    pub sexually_explicit: Threshold,
    pub dangerous_content: Threshold,
}

impl SafetySettings {
    pub fn uniform(threshold: Threshold) -> Self {
        Self {
            harassment: threshold,
            hate_speech: threshold,
            sexually_explicit: threshold,
            dangerous_content: threshold,
        }
    }

    pub fn preset(preset: SafetyPreset) -> Self {
        match preset {
            SafetyPreset::Strict => Self::uniform(Threshold::Low),
            SafetyPreset::Balanced => Self::uniform(Threshold::Medium),
            SafetyPreset::Permissive => Self::uniform(Threshold::High),
        }
    }

    /// `(category, threshold)` pairs in API spelling.
    pub fn categories(&self) -> [(&'static str, Threshold); 4] {
        [
            ("HARM_CATEGORY_HARASSMENT", self.harassment),
            ("HARM_CATEGORY_HATE_SPEECH", self.hate_speech),
            ("HARM_CATEGORY_SEXUALLY_EXPLICIT", self.sexually_explicit),
            ("HARM_CATEGORY_DANGEROUS_CONTENT", self.dangerous_content),
        ]
    }
}

/// Image-specific knobs. Each adapter uses the subset its API understands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    /// `W:H`, snapped to the nearest supported ratio
    pub aspect_ratio: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// -1 asks the provider for a random seed
    pub seed: Option<i64>,
    pub output_format: Option<String>,
    /// Image count for sequential generation
    pub max_images: Option<u32>,
}

/// Per-call parameters.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub images: Vec<ImageInput>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Overrides the client's safety settings for this call
    pub safety: Option<SafetySettings>,
    pub image: ImageOptions,
    /// Output tokens held back when trimming history; defaults to
    /// `max_tokens` plus the configured reserve buffer
    pub reserved_output: Option<usize>,
    /// Window to trim history against instead of the model's own
    pub context_window: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(mut self, image: ImageInput) -> Self {
        self.images.push(image);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn safety(mut self, safety: SafetySettings) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn image_options(mut self, options: ImageOptions) -> Self {
        self.image = options;
        self
    }

    pub fn reserved_output(mut self, tokens: usize) -> Self {
        self.reserved_output = Some(tokens);
        self
    }

    pub fn context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Prompt plus parameters for one call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
        }
    }

    pub fn images(&self) -> &[ImageInput] {
        &self.params.images
    }
}

/// Normalised outcome of one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub images: Vec<ImageOutput>,
    pub usage: Usage,
    /// Provider stop or finish reason, verbatim
    pub stop_reason: Option<String>,
    pub model: String,
    /// Provider task id for long-running jobs
    pub task_id: Option<String>,
}

impl GenerationResult {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.images.iter().filter_map(ImageOutput::as_url).collect()
    }
}
