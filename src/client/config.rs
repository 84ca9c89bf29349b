//! Per-client configuration.

use crate::auth::ApiKey;
use crate::provider::{Capability, Provider, SafetySettings};

/// Everything an adapter needs to know about the client it serves.
///
/// Fixed once a client is built. [`with_system_instruction`] and
/// [`with_safety`] return derived copies, so a config shared between clones
/// is never changed underneath them.
///
/// [`with_system_instruction`]: ClientConfig::with_system_instruction
/// [`with_safety`]: ClientConfig::with_safety
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    provider: Provider,
    model: String,
    capability: Capability,
    streaming: bool,
    caching: bool,
    api_key: ApiKey,
    base_url: String,
    system_instruction: Option<String>,
    safety: Option<SafetySettings>,
}

impl ClientConfig {
    /// Config with the provider's default capability and endpoint.
    pub fn new(provider: Provider, model: impl Into<String>, api_key: ApiKey) -> Self {
        let model = model.into();
        Self {
            provider,
            capability: provider.default_capability(&model),
            model,
            streaming: false,
            caching: false,
            api_key,
            base_url: provider.default_base_url().to_string(),
            system_instruction: None,
            safety: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Derived copy with a new system instruction. Empty clears it.
    pub fn with_system_instruction(&self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        Self {
            system_instruction: (!instruction.trim().is_empty()).then_some(instruction),
            ..self.clone()
        }
    }

    /// Derived copy with new safety thresholds.
    pub fn with_safety(&self, safety: SafetySettings) -> Self {
        Self {
            safety: Some(safety),
            ..self.clone()
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn safety(&self) -> Option<&SafetySettings> {
        self.safety.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{SafetyPreset, Threshold};

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new(Provider::Gemini, "gemini-2.5-flash-image", ApiKey::new("k"));
        assert_eq!(config.capability(), Capability::ImageGenerate);
        assert_eq!(config.base_url(), "https://generativelanguage.googleapis.com");
        assert!(!config.streaming());
        assert!(config.system_instruction().is_none());
    }

    #[test]
    fn test_derived_copies_leave_original_untouched() {
        let base = ClientConfig::new(Provider::Claude, "claude-haiku-4-5", ApiKey::new("k"));
        let terse = base.with_system_instruction("You are terse.");
        let strict = terse.with_safety(SafetySettings::preset(SafetyPreset::Strict));

        assert!(base.system_instruction().is_none());
        assert_eq!(terse.system_instruction(), Some("You are terse."));
        assert!(terse.safety().is_none());
        assert_eq!(strict.safety().unwrap().harassment, Threshold::Low);
        assert!(terse.with_system_instruction("  ").system_instruction().is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = ClientConfig::new(Provider::WaveSpeed, "bytedance/seedream-v4", ApiKey::new("k"))
            .with_base_url("http://localhost:8080/");
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::new(Provider::Claude, "claude-haiku-4-5", ApiKey::new("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
