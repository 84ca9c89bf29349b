//! API key resolution
//!
//! Keys are looked up in a fixed order: explicit argument, provider
//! environment variables, then the provider section of the config file.
//! The first non-empty hit wins.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::{self, Settings};
use crate::error::Error;
use crate::provider::Provider;
use crate::Result;

/// An API key. `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for placing in request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Where a resolved key came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment(String),
    ConfigFile(PathBuf),
    /// Settings handed to the resolver instead of a file
    Settings,
}

/// Environment lookup function, injectable for tests.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves provider API keys.
#[derive(Clone)]
pub struct CredentialResolver {
    env: EnvLookup,
    config_path: PathBuf,
    settings: Option<Settings>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    /// Resolver over the process environment and the default config file.
    pub fn new() -> Self {
        Self {
            env: Arc::new(|name| std::env::var(name).ok()),
            config_path: config::config_path(),
            settings: None,
        }
    }

    /// Replace the environment lookup.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Read keys from a different config file.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Take config-file keys from already loaded settings. The config file
    /// is not read when these are set.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Resolve a key for `provider`.
    pub fn resolve(&self, provider: Provider, explicit: Option<&str>) -> Result<ApiKey> {
        self.resolve_with_source(provider, explicit).map(|(key, _)| key)
    }

    /// Resolve a key and report which source supplied it.
    pub fn resolve_with_source(
        &self,
        provider: Provider,
        explicit: Option<&str>,
    ) -> Result<(ApiKey, CredentialSource)> {
        if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
            debug!(provider = %provider, "Using API key from explicit input");
            return Ok((ApiKey::new(key), CredentialSource::Explicit));
        }

        for var in provider.env_vars() {
            if let Some(key) = (self.env)(var)
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
            {
                debug!(provider = %provider, var, "Using API key from environment");
                return Ok((ApiKey::new(key), CredentialSource::Environment(var.to_string())));
            }
        }

        let (settings, source) = match &self.settings {
            Some(settings) => (settings.clone(), CredentialSource::Settings),
            None => (
                config::load_from(&self.config_path)?,
                CredentialSource::ConfigFile(self.config_path.clone()),
            ),
        };
        if let Some(section) = settings.section(provider.section()) {
            let key = section.api_key.trim();
            if !key.is_empty() {
                debug!(provider = %provider, source = ?source, "Using API key from settings");
                return Ok((ApiKey::new(key), source));
            }
        }

        Err(Error::NoCredential {
            provider: provider.to_string(),
            env_hint: provider.env_vars().join(" or "),
            section: provider.section().to_string(),
            config_hint: self.config_path.display().to_string(),
        })
    }
}
