//! Client Configuration
//!
//! Centralized configuration for the chat client core, supporting a TOML
//! configuration file at `~/.config/palaver/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. Builder setters (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! backend_url = "http://127.0.0.1:5000"
//! probe_timeout_ms = 5000
//! request_timeout_ms = 30000
//! reconnect_backoff_step_ms = 1000
//! reconnect_backoff_ceiling_ms = 15000
//! resubscribe_delay_ms = 1000
//! fallback_word_delay_ms = 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// On-disk TOML shape; every field optional so partial files work
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Base HTTP URL of the chat backend
    pub backend_url: Option<String>,

    /// Liveness probe timeout in milliseconds
    pub probe_timeout_ms: Option<u64>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Reconnect backoff step in milliseconds
    pub reconnect_backoff_step_ms: Option<u64>,

    /// Reconnect backoff ceiling in milliseconds
    pub reconnect_backoff_ceiling_ms: Option<u64>,

    /// Delay between resubscribe attempts in milliseconds
    pub resubscribe_delay_ms: Option<u64>,

    /// Inter-word delay of the canned fallback stream in milliseconds
    pub fallback_word_delay_ms: Option<u64>,
}

/// Runtime configuration for the chat client core
///
/// All durations are real [`Duration`]s; the TOML and environment layers
/// accept millisecond integers and convert on load.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base HTTP URL of the chat backend (no trailing slash)
    pub backend_url: String,

    /// How long the liveness probe waits before declaring the backend down
    pub probe_timeout: Duration,

    /// Timeout applied to each individual REST request
    pub request_timeout: Duration,

    /// Backoff step for live-connection retries; attempt `n` waits
    /// `(n + 1) * step`, capped at the ceiling
    pub reconnect_backoff_step: Duration,

    /// Upper bound on the live-connection retry backoff
    pub reconnect_backoff_ceiling: Duration,

    /// Pause between per-conversation resubscribe attempts
    pub resubscribe_delay: Duration,

    /// Pacing delay between words of the canned fallback stream
    pub fallback_word_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5000".to_string(),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            reconnect_backoff_step: Duration::from_secs(1),
            reconnect_backoff_ceiling: Duration::from_secs(15),
            resubscribe_delay: Duration::from_secs(1),
            fallback_word_delay: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend base URL
    #[must_use]
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Set the liveness probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect backoff step and ceiling
    #[must_use]
    pub fn with_reconnect_backoff(mut self, step: Duration, ceiling: Duration) -> Self {
        self.reconnect_backoff_step = step;
        self.reconnect_backoff_ceiling = ceiling;
        self
    }

    /// Set the delay between resubscribe attempts
    #[must_use]
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Set the pacing delay of the canned fallback stream
    #[must_use]
    pub fn with_fallback_word_delay(mut self, delay: Duration) -> Self {
        self.fallback_word_delay = delay;
        self
    }

    /// Create a config suitable for testing (millisecond-scale delays)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5000".to_string(),
            probe_timeout: Duration::from_millis(50),
            request_timeout: Duration::from_millis(250),
            reconnect_backoff_step: Duration::from_millis(5),
            reconnect_backoff_ceiling: Duration::from_millis(25),
            resubscribe_delay: Duration::from_millis(5),
            fallback_word_delay: Duration::from_millis(1),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PALAVER_BACKEND_URL`: Base HTTP URL of the backend
    /// - `PALAVER_PROBE_TIMEOUT_MS`: Liveness probe timeout in ms
    /// - `PALAVER_REQUEST_TIMEOUT_MS`: Per-request timeout in ms
    /// - `PALAVER_BACKOFF_STEP_MS`: Reconnect backoff step in ms
    /// - `PALAVER_BACKOFF_CEILING_MS`: Reconnect backoff ceiling in ms
    /// - `PALAVER_RESUBSCRIBE_DELAY_MS`: Resubscribe pause in ms
    /// - `PALAVER_FALLBACK_DELAY_MS`: Fallback word pacing in ms
    ///
    /// Unset or unparseable variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_config(&mut config);
        config
    }

    /// Load configuration from the default file location, then apply
    /// environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed. A missing config file is not an error (defaults are used).
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_file(default_config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to the configuration file. If `None`, only
    ///   defaults and environment variables are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the specified config file cannot be read or parsed.
    pub fn from_file(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Try to load from file
        if let Some(ref config_path) = path {
            if config_path.exists() {
                let toml_content =
                    std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                        path: config_path.clone(),
                        source: e,
                    })?;

                let toml_config: ClientToml = toml::from_str(&toml_content)?;
                apply_toml_config(&mut config, &toml_config);

                tracing::info!(
                    path = %config_path.display(),
                    "Loaded configuration from file"
                );
            } else {
                tracing::debug!(
                    path = %config_path.display(),
                    "Config file not found, using defaults"
                );
            }
        }

        // Apply environment variables (overrides file values)
        apply_env_config(&mut config);

        Ok(config)
    }
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/palaver/client.toml` or
/// `~/.config/palaver/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("palaver").join("client.toml"))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref url) = toml.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(ms) = toml.probe_timeout_ms {
        config.probe_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.request_timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reconnect_backoff_step_ms {
        config.reconnect_backoff_step = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reconnect_backoff_ceiling_ms {
        config.reconnect_backoff_ceiling = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.resubscribe_delay_ms {
        config.resubscribe_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.fallback_word_delay_ms {
        config.fallback_word_delay = Duration::from_millis(ms);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig) {
    if let Ok(url) = std::env::var("PALAVER_BACKEND_URL") {
        config.backend_url = url;
    }
    if let Ok(ms) = std::env::var("PALAVER_PROBE_TIMEOUT_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.probe_timeout = Duration::from_millis(ms);
        }
    }
    if let Ok(ms) = std::env::var("PALAVER_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.request_timeout = Duration::from_millis(ms);
        }
    }
    if let Ok(ms) = std::env::var("PALAVER_BACKOFF_STEP_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.reconnect_backoff_step = Duration::from_millis(ms);
        }
    }
    if let Ok(ms) = std::env::var("PALAVER_BACKOFF_CEILING_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.reconnect_backoff_ceiling = Duration::from_millis(ms);
        }
    }
    if let Ok(ms) = std::env::var("PALAVER_RESUBSCRIBE_DELAY_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.resubscribe_delay = Duration::from_millis(ms);
        }
    }
    if let Ok(ms) = std::env::var("PALAVER_FALLBACK_DELAY_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            config.fallback_word_delay = Duration::from_millis(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Clean up all environment variables used by config loading.
    /// Call this at the start of tests that need clean environment state.
    fn clear_config_env_vars() {
        std::env::remove_var("PALAVER_BACKEND_URL");
        std::env::remove_var("PALAVER_PROBE_TIMEOUT_MS");
        std::env::remove_var("PALAVER_REQUEST_TIMEOUT_MS");
        std::env::remove_var("PALAVER_BACKOFF_STEP_MS");
        std::env::remove_var("PALAVER_BACKOFF_CEILING_MS");
        std::env::remove_var("PALAVER_RESUBSCRIBE_DELAY_MS");
        std::env::remove_var("PALAVER_FALLBACK_DELAY_MS");
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();

        assert_eq!(config.backend_url, "http://127.0.0.1:5000");
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_backoff_step, Duration::from_secs(1));
        assert_eq!(config.reconnect_backoff_ceiling, Duration::from_secs(15));
        assert_eq!(config.resubscribe_delay, Duration::from_secs(1));
        assert_eq!(config.fallback_word_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::new()
            .with_backend_url("http://10.0.0.7:8080")
            .with_probe_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(10))
            .with_reconnect_backoff(Duration::from_millis(500), Duration::from_secs(8))
            .with_resubscribe_delay(Duration::from_millis(250))
            .with_fallback_word_delay(Duration::from_millis(10));

        assert_eq!(config.backend_url, "http://10.0.0.7:8080");
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_backoff_step, Duration::from_millis(500));
        assert_eq!(config.reconnect_backoff_ceiling, Duration::from_secs(8));
        assert_eq!(config.resubscribe_delay, Duration::from_millis(250));
        assert_eq!(config.fallback_word_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_for_testing_is_fast() {
        let config = ClientConfig::for_testing();

        assert!(config.probe_timeout <= Duration::from_millis(250));
        assert!(config.reconnect_backoff_ceiling <= Duration::from_millis(250));
        assert!(config.resubscribe_delay <= Duration::from_millis(250));
        assert!(config.fallback_word_delay <= Duration::from_millis(250));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        // Should return Some path (depends on environment)
        if let Some(p) = path {
            assert!(p.to_string_lossy().contains("palaver"));
            assert!(p.to_string_lossy().contains("client.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let toml_content = r#"
backend_url = "http://192.168.1.20:5000"
probe_timeout_ms = 2500
request_timeout_ms = 12000
reconnect_backoff_step_ms = 200
reconnect_backoff_ceiling_ms = 4000
resubscribe_delay_ms = 300
fallback_word_delay_ms = 20
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        clear_config_env_vars();
        let config = ClientConfig::from_file(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.backend_url, "http://192.168.1.20:5000");
        assert_eq!(config.probe_timeout, Duration::from_millis(2500));
        assert_eq!(config.request_timeout, Duration::from_millis(12000));
        assert_eq!(config.reconnect_backoff_step, Duration::from_millis(200));
        assert_eq!(config.reconnect_backoff_ceiling, Duration::from_millis(4000));
        assert_eq!(config.resubscribe_delay, Duration::from_millis(300));
        assert_eq!(config.fallback_word_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_content = r#"
probe_timeout_ms = 750
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        clear_config_env_vars();
        let config = ClientConfig::from_file(Some(file.path().to_path_buf())).unwrap();

        // Specified value
        assert_eq!(config.probe_timeout, Duration::from_millis(750));

        // Default values should be preserved
        assert_eq!(config.backend_url, "http://127.0.0.1:5000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_graceful() {
        clear_config_env_vars();

        let path = PathBuf::from("/nonexistent/path/client.toml");
        let config = ClientConfig::from_file(Some(path)).unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_no_path_uses_defaults() {
        clear_config_env_vars();

        let config = ClientConfig::from_file(None).unwrap();
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_toml_error() {
        let toml_content = r#"
backend_url = [not a string
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let result = ClientConfig::from_file(Some(file.path().to_path_buf()));
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    /// Environment variables override file values.
    ///
    /// Parallel tests share the process environment, so this asserts the
    /// loaded value is the env value or the file value, never the default.
    #[test]
    fn test_env_overrides_file() {
        clear_config_env_vars();

        let toml_content = r#"
probe_timeout_ms = 1500
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        std::env::set_var("PALAVER_PROBE_TIMEOUT_MS", "900");
        let config = ClientConfig::from_file(Some(file.path().to_path_buf())).unwrap();
        clear_config_env_vars();

        assert!(
            config.probe_timeout == Duration::from_millis(900)
                || config.probe_timeout == Duration::from_millis(1500),
            "Expected env or file value, got: {:?}",
            config.probe_timeout
        );
        assert_ne!(config.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        clear_config_env_vars();

        std::env::set_var("PALAVER_REQUEST_TIMEOUT_MS", "not-a-number");
        let config = ClientConfig::from_env();
        clear_config_env_vars();

        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_toml_round_trip() {
        let original = ClientToml {
            backend_url: Some("http://127.0.0.1:9999".to_string()),
            probe_timeout_ms: Some(1234),
            ..Default::default()
        };

        let toml_string = toml::to_string(&original).unwrap();
        let parsed: ClientToml = toml::from_str(&toml_string).unwrap();

        assert_eq!(parsed.backend_url, Some("http://127.0.0.1:9999".to_string()));
        assert_eq!(parsed.probe_timeout_ms, Some(1234));
        assert_eq!(parsed.request_timeout_ms, None);
    }
}
