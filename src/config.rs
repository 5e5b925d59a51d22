//! Configuration for adforge

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AdforgeError, Result};

/// Default image-inference WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://ws-api.runware.ai/v1";

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adforge")
        .join("config.toml")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Image-inference WebSocket URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key for the image-inference endpoint.
    /// Without it every banner is a local placeholder.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Delay between reconnection attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum consecutive reconnection attempts (0 = unlimited)
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// How long to wait for the authentication acknowledgement
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Per-request timeout (0 = wait indefinitely)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Brand scraper endpoint
    #[serde(default = "default_scraper_url")]
    pub scraper_url: String,

    /// Placeholder banner appearance
    #[serde(default)]
    pub placeholder: PlaceholderConfig,
}

/// Placeholder banner appearance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceholderConfig {
    #[serde(default = "default_placeholder_width")]
    pub width: u32,

    #[serde(default = "default_placeholder_height")]
    pub height: u32,

    /// Gradient start colour (any SVG colour value)
    #[serde(default = "default_gradient_start")]
    pub gradient_start: String,

    /// Gradient end colour
    #[serde(default = "default_gradient_end")]
    pub gradient_end: String,

    /// Text colour
    #[serde(default = "default_foreground")]
    pub foreground: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_scraper_url() -> String {
    "http://localhost:5001/scrape".to_string()
}

fn default_placeholder_width() -> u32 {
    1200
}

fn default_placeholder_height() -> u32 {
    628
}

fn default_gradient_start() -> String {
    "hsl(262 83% 58%)".to_string()
}

fn default_gradient_end() -> String {
    "hsl(221 83% 53%)".to_string()
}

fn default_foreground() -> String {
    "hsl(0 0% 100%)".to_string()
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: default_placeholder_width(),
            height: default_placeholder_height(),
            gradient_start: default_gradient_start(),
            gradient_end: default_gradient_end(),
            foreground: default_foreground(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            auth_timeout_ms: default_auth_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            scraper_url: default_scraper_url(),
            placeholder: PlaceholderConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AdforgeError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| AdforgeError::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// `None` when requests may wait indefinitely.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// The API key, if one is set and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.max_reconnect_attempts, 0); // Unlimited
        assert!(config.credential().is_none());
        assert_eq!(config.placeholder.width, 1200);
        assert_eq!(config.placeholder.height, 628);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_key = "secret"
            reconnect_delay_ms = 250

            [placeholder]
            width = 800
            "#,
        )
        .unwrap();
        assert_eq!(config.credential(), Some("secret"));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.placeholder.width, 800);
        assert_eq!(config.placeholder.height, 628);
    }

    #[test]
    fn test_blank_api_key_is_no_credential() {
        let config = Config {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        assert!(config.credential().is_none());
    }

    #[test]
    fn test_request_timeout_zero_disables() {
        let config = Config {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            api_key: Some("k".into()),
            max_reconnect_attempts: 3,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.api_key.as_deref(), Some("k"));
        assert_eq!(loaded.max_reconnect_attempts, 3);
        assert_eq!(loaded.placeholder, config.placeholder);
    }

    #[test]
    fn test_load_invalid_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "reconnect_delay_ms = \"soon\"").unwrap();
        assert!(matches!(Config::load(&path), Err(AdforgeError::Config(_))));
    }
}
