//! Provider adapters.
//!
//! This module provides:
//! - [`Provider`] families and their credential/endpoint metadata
//! - [`ProviderAdapter`], the build/parse/limits contract
//! - [`Adapter`], the closed set of adapters chosen once per client
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `openai.rs`) with a unit adapter struct
//! 2. Implement `ProviderAdapter` for it
//! 3. Add a `Provider` variant and an `Adapter` arm
//! 4. Add a config section in `config.rs`

mod claude;
mod gemini;
mod gemini_types;
pub mod media;
mod types;
mod wavespeed;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;
use crate::conversation::ConversationState;
use crate::error::{Error, Result};
use crate::transport::{WireRequest, WireResponse};

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use types::*;
pub use wavespeed::{WaveSpeedAdapter, WaveSpeedModel};

/// API families the crate can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Gemini,
    WaveSpeed,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Claude, Provider::Gemini, Provider::WaveSpeed];

    /// Environment variables checked for a key, in order.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::Claude => &["ANTHROPIC_API_KEY"],
            Provider::Gemini => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            Provider::WaveSpeed => &["WAVESPEED_API_KEY"],
        }
    }

    /// Config file section holding this provider's settings.
    pub fn section(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::WaveSpeed => "wavespeed",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Claude => "https://api.anthropic.com",
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::WaveSpeed => "https://api.wavespeed.ai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Claude => claude::DEFAULT_MODEL,
            Provider::Gemini => gemini::DEFAULT_MODEL,
            Provider::WaveSpeed => wavespeed::DEFAULT_MODEL,
        }
    }

    /// Provider serving `model`, from the model id's prefix.
    pub fn from_model(model: &str) -> Result<Provider> {
        let model = model.trim();
        if model.starts_with("claude") {
            Ok(Provider::Claude)
        } else if model.starts_with("gemini") {
            Ok(Provider::Gemini)
        } else if WaveSpeedModel::from_model(model).is_some() {
            Ok(Provider::WaveSpeed)
        } else {
            Err(Error::validation(format!(
                "unknown model '{}': expected a claude-*, gemini-*, bytedance/seedream-* or wavespeed-ai/qwen-image/* id",
                model
            )))
        }
    }

    /// Capability a client gets when none is requested.
    pub fn default_capability(&self, model: &str) -> Capability {
        match self {
            Provider::Claude => Capability::Chat,
            Provider::Gemini if gemini::is_image_model(model) => Capability::ImageGenerate,
            Provider::Gemini => Capability::Chat,
            Provider::WaveSpeed => WaveSpeedModel::from_model(model)
                .map(|m| m.capability())
                .unwrap_or(Capability::ImageGenerate),
        }
    }

    /// Whether `model` can serve `capability`.
    pub fn supports(&self, capability: Capability, model: &str) -> bool {
        match self {
            Provider::Claude => matches!(capability, Capability::Chat | Capability::Vision),
            Provider::Gemini => {
                let image_model = gemini::is_image_model(model);
                match capability {
                    Capability::Chat | Capability::Vision => true,
                    Capability::ImageGenerate | Capability::ImageEdit => image_model,
                }
            }
            Provider::WaveSpeed => WaveSpeedModel::from_model(model)
                .map(|m| m.capability() == capability)
                .unwrap_or(false),
        }
    }

    pub fn adapter(&self) -> Adapter {
        match self {
            Provider::Claude => Adapter::Claude(ClaudeAdapter),
            Provider::Gemini => Adapter::Gemini(GeminiAdapter),
            Provider::WaveSpeed => Adapter::WaveSpeed(WaveSpeedAdapter),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::Claude => "Claude",
            Provider::Gemini => "Gemini",
            Provider::WaveSpeed => "WaveSpeed",
        })
    }
}

/// What a client is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Vision,
    ImageGenerate,
    ImageEdit,
}

impl Capability {
    pub fn produces_images(&self) -> bool {
        matches!(self, Capability::ImageGenerate | Capability::ImageEdit)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Chat => "chat",
            Capability::Vision => "vision",
            Capability::ImageGenerate => "image generation",
            Capability::ImageEdit => "image editing",
        })
    }
}

/// Constraints an adapter declares for the active model and capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterLimits {
    pub min_images: usize,
    pub max_images: usize,
    pub temperature_range: (f32, f32),
    pub default_temperature: f32,
    pub max_output_tokens: u32,
    pub default_max_tokens: u32,
    pub context_window: usize,
    /// Images must reach the provider as URLs (inline data is uploaded first)
    pub requires_image_urls: bool,
}

impl AdapterLimits {
    pub fn clamp_temperature(&self, requested: Option<f32>) -> f32 {
        let (min, max) = self.temperature_range;
        media::clamp_f32(requested.unwrap_or(self.default_temperature), min, max)
    }

    pub fn clamp_max_tokens(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_tokens)
            .clamp(1, self.max_output_tokens)
    }
}

/// Outcome of parsing one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Done(GenerationResult),
    /// Task still running; send this request to poll it
    Pending(WireRequest),
}

/// Translates between normalised requests/results and one provider's wire format.
pub trait ProviderAdapter {
    fn limits(&self, config: &ClientConfig) -> AdapterLimits;

    /// Build the wire request. `context` ends with the current user turn.
    fn build(
        &self,
        request: &GenerationRequest,
        context: &ConversationState,
        config: &ClientConfig,
    ) -> Result<WireRequest>;

    fn parse(&self, response: WireResponse, config: &ClientConfig) -> Result<Parsed>;

    /// Token-counting request, for providers with a counting endpoint.
    fn build_count_tokens(
        &self,
        _context: &ConversationState,
        _config: &ClientConfig,
    ) -> Option<WireRequest> {
        None
    }

    fn parse_count_tokens(&self, _response: WireResponse) -> Result<usize> {
        Err(Error::validation("provider has no token counting endpoint"))
    }

    /// Check the prompt and image count before anything touches the network.
    fn validate(&self, request: &GenerationRequest, config: &ClientConfig) -> Result<()> {
        validate_request(request, &self.limits(config), config)
    }
}

pub(crate) fn validate_request(
    request: &GenerationRequest,
    limits: &AdapterLimits,
    config: &ClientConfig,
) -> Result<()> {
    if request.prompt.trim().is_empty() {
        return Err(Error::validation("Prompt cannot be empty"));
    }

    let count = request.images().len();
    if count < limits.min_images || count > limits.max_images {
        let expected = if limits.min_images == limits.max_images {
            format!("exactly {}", limits.min_images)
        } else {
            format!("between {} and {}", limits.min_images, limits.max_images)
        };
        return Err(Error::validation(format!(
            "{} with {} requires {} image(s), got {}",
            config.capability(),
            config.model(),
            expected,
            count
        )));
    }
    Ok(())
}

/// Adapter selected once at client construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Claude(ClaudeAdapter),
    Gemini(GeminiAdapter),
    WaveSpeed(WaveSpeedAdapter),
}

impl Adapter {
    fn inner(&self) -> &dyn ProviderAdapter {
        match self {
            Adapter::Claude(a) => a,
            Adapter::Gemini(a) => a,
            Adapter::WaveSpeed(a) => a,
        }
    }
}

impl ProviderAdapter for Adapter {
    fn limits(&self, config: &ClientConfig) -> AdapterLimits {
        self.inner().limits(config)
    }

    fn build(
        &self,
        request: &GenerationRequest,
        context: &ConversationState,
        config: &ClientConfig,
    ) -> Result<WireRequest> {
        self.inner().build(request, context, config)
    }

    fn parse(&self, response: WireResponse, config: &ClientConfig) -> Result<Parsed> {
        self.inner().parse(response, config)
    }

    fn build_count_tokens(
        &self,
        context: &ConversationState,
        config: &ClientConfig,
    ) -> Option<WireRequest> {
        self.inner().build_count_tokens(context, config)
    }

    fn parse_count_tokens(&self, response: WireResponse) -> Result<usize> {
        self.inner().parse_count_tokens(response)
    }
}
