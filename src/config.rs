//! Configuration management
//!
//! Settings live in a JSON file with one section per provider:
//!
//! ```json
//! {
//!   "claude": { "api_key": "sk-ant-..." },
//!   "gemini": { "api_key": "...", "default_model": "gemini-2.5-flash" },
//!   "wavespeed": { "api_key": "..." },
//!   "retry": { "max_attempts": 5 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::transport::RetryPolicy;
use crate::Result;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "GENBRIDGE_CONFIG";

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub claude: ProviderSection,

    #[serde(default)]
    pub gemini: ProviderSection,

    #[serde(default)]
    pub wavespeed: ProviderSection,

    /// Retry policy applied to every provider call
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub conversation: ConversationSettings,
}

/// Per-provider section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub api_key: String,

    /// Override for the provider's API root (proxies, test servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// Tokens reserved on top of `max_tokens` when no explicit output budget is given
    #[serde(default = "default_reserve_buffer")]
    pub reserve_buffer: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    32_000
}

fn default_jitter() -> bool {
    true
}

fn default_reserve_buffer() -> usize {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            reserve_buffer: default_reserve_buffer(),
        }
    }
}

impl Settings {
    /// Look up a provider section by its name.
    pub fn section(&self, name: &str) -> Option<&ProviderSection> {
        match name {
            "claude" => Some(&self.claude),
            "gemini" => Some(&self.gemini),
            "wavespeed" => Some(&self.wavespeed),
            _ => None,
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".genbridge")
}

/// Get the config file path, honouring `GENBRIDGE_CONFIG`
pub fn config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => config_dir().join("config.json"),
    }
}

/// Load settings from the default location. A missing file yields defaults.
pub fn load() -> Result<Settings> {
    load_from(&config_path())
}

/// Load settings from a specific file. A missing file yields defaults.
pub fn load_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {:?}: {}", path, e)))
}

/// Save settings to a file
pub fn save_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;

    // The file holds API keys
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.conversation.reserve_buffer, 1000);
        assert!(settings.claude.api_key.is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_from(&dir.path().join("nope.json")).unwrap();
        assert!(settings.gemini.api_key.is_empty());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gemini": {"api_key": "g-key"}, "retry": {"max_attempts": 5}}"#).unwrap();

        let settings = load_from(&path).unwrap();
        assert_eq!(settings.section("gemini").unwrap().api_key, "g-key");
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 1000);
        assert!(settings.section("openai").is_none());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut settings = Settings::default();
        settings.wavespeed.api_key = "ws".to_string();
        save_to(&path, &settings).unwrap();

        let parsed = load_from(&path).unwrap();
        assert_eq!(parsed.wavespeed.api_key, "ws");
    }

    #[test]
    fn test_retry_settings_to_policy() {
        let settings = RetrySettings {
            max_attempts: 0,
            base_delay_ms: 250,
            max_delay_ms: 4000,
            jitter: false,
        };
        let policy = settings.to_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert!(!policy.jitter);
    }
}
