//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: server URL,
//! namespaces, handshake extras, timeouts, reconnection policy and logging.
//! Configuration is persisted as TOML on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{SioError, SioResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Reconnection backoff settings.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Socket.IO server URL (e.g., "https://example.com:3000").
    #[serde(default)]
    pub url: String,

    /// Resource path of the Socket.IO endpoint, without slashes.
    #[serde(default = "default_path")]
    pub path: String,

    /// Namespaces to join in addition to the default one.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Extra query parameters appended to the connection URL.
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// Extra HTTP headers sent with the websocket upgrade request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Authentication payload sent with every namespace connect packet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,

    /// Whether to accept invalid TLS certificates from the server.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Transport setup plus handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Time allowed for a graceful close in milliseconds.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,

    /// Default acknowledgement deadline in milliseconds.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Capacity of the per-namespace queue of emits waiting for a join.
    #[serde(default = "default_pending_capacity")]
    pub pending_queue_capacity: usize,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Whether the client reconnects automatically after losing the transport.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before the first reconnection attempt in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,

    /// Upper bound for the reconnection delay in milliseconds.
    #[serde(default = "default_reconnect_delay_max")]
    pub delay_max_ms: u64,

    /// Growth factor applied to the delay on each attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomization factor (0.0 to 1.0) applied to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Maximum number of reconnection attempts (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_path() -> String {
    constants::DEFAULT_PATH.to_string()
}

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_close_timeout() -> u64 {
    constants::DEFAULT_CLOSE_TIMEOUT_MS
}

fn default_ack_timeout() -> u64 {
    constants::DEFAULT_ACK_TIMEOUT_MS
}

fn default_pending_capacity() -> usize {
    constants::DEFAULT_PENDING_QUEUE_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    constants::reconnect::DELAY_MS
}

fn default_reconnect_delay_max() -> u64 {
    constants::reconnect::DELAY_MAX_MS
}

fn default_multiplier() -> f64 {
    constants::reconnect::MULTIPLIER
}

fn default_jitter() -> f64 {
    constants::reconnect::JITTER
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            path: default_path(),
            namespaces: Vec::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            auth: None,
            accept_invalid_certs: false,
            connect_timeout_ms: default_connect_timeout(),
            close_timeout_ms: default_close_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            pending_queue_capacity: default_pending_capacity(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_reconnect_delay(),
            delay_max_ms: default_reconnect_delay_max(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> SioResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> SioResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> SioResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SioError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> SioResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> SioResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether a server URL is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.client.url.is_empty()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> SioResult<()> {
        let r = &self.reconnect;
        if r.delay_ms > r.delay_max_ms {
            return Err(SioError::Config(format!(
                "reconnect.delay_ms ({}) exceeds reconnect.delay_max_ms ({})",
                r.delay_ms, r.delay_max_ms
            )));
        }
        if !r.multiplier.is_finite() || !r.jitter.is_finite() {
            return Err(SioError::Config("reconnect.multiplier and reconnect.jitter must be finite".into()));
        }
        if r.multiplier < 1.0 {
            return Err(SioError::Config("reconnect.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&r.jitter) {
            return Err(SioError::Config("reconnect.jitter must be within 0.0..=1.0".into()));
        }
        if self.client.pending_queue_capacity == 0 {
            return Err(SioError::Config("client.pending_queue_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Sanitize and normalize a server URL.
    ///
    /// Strips whitespace and quotes, adds `http://` when no scheme is given,
    /// and removes trailing slashes.
    pub fn sanitize_server_url(url: &str) -> String {
        let trimmed = url.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to the given path.
    pub async fn save(&self, path: &Path) -> SioResult<()> {
        let config = self.inner.read().await;
        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.client.path, "socket.io");
        assert_eq!(config.client.ack_timeout_ms, 20_000);
        assert_eq!(config.reconnect.delay_ms, 5_000);
        assert_eq!(config.reconnect.delay_max_ms, 25_000);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.logging.level, "info");
        assert!(!config.is_server_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitize_server_url() {
        assert_eq!(
            AppConfig::sanitize_server_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(
            AppConfig::sanitize_server_url("  \"https://example.com/\"  "),
            "https://example.com"
        );
        assert_eq!(
            AppConfig::sanitize_server_url("wss://example.com/socket.io/"),
            "wss://example.com/socket.io"
        );
        assert_eq!(AppConfig::sanitize_server_url("   "), "");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [client]
            url = "http://localhost:3000"
            namespaces = ["/chat"]

            [client.auth]
            token = "abc"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.client.namespaces, vec!["/chat".to_string()]);
        assert_eq!(config.client.auth, Some(serde_json::json!({"token": "abc"})));
        assert_eq!(config.client.connect_timeout_ms, 20_000);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.multiplier, 1.5);
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = AppConfig::default();
        config.reconnect.delay_ms = 30_000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reconnect.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_backoff() {
        let mut config = AppConfig::default();
        config.reconnect.jitter = f64::NAN;
        assert!(matches!(config.validate(), Err(SioError::Config(_))));

        let mut config = AppConfig::default();
        config.reconnect.multiplier = f64::INFINITY;
        assert!(matches!(config.validate(), Err(SioError::Config(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.client.url = "https://example.com".into();
        config.client.headers.insert("X-Trace".into(), "1".into());
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.client.url, "https://example.com");
        assert_eq!(loaded.client.headers.get("X-Trace").map(String::as_str), Some("1"));
        assert_eq!(loaded.reconnect.delay_max_ms, config.reconnect.delay_max_ms);
    }
}
