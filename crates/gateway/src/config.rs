//! Configuration management for the fsgate gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/fsgate/config.toml`.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::CipherAlgorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("security.secret must be set (or FSGATE_SECRET)")]
    MissingSecret,

    #[error("security.cipher must be one of: aes-128-gcm, aes-256-gcm; got {0}")]
    UnsupportedCipher(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("base_url must be an http:// or https:// URL, got {0}")]
    InvalidBaseUrl(String),

    #[error("action must be an absolute path like /site/file, got {0}")]
    InvalidAction(String),

    #[error("bind must be a socket address like 127.0.0.1:8080, got {0}")]
    InvalidBind(String),

    #[error("storage.archive must be set for the zip backend")]
    MissingArchive,

    #[error("default_expiry must be between 1 and {max} seconds, got {0}", max = MAX_DEFAULT_EXPIRY)]
    InvalidDefaultExpiry(u64),

    #[error("public_base_url must be an http:// or https:// URL, got {0}")]
    InvalidPublicBaseUrl(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `security.default_expiry`: one week.
pub const MAX_DEFAULT_EXPIRY: u64 = 7 * 24 * 60 * 60;

/// Route answering liveness probes; the delivery action may not shadow it.
pub const HEALTH_PATH: &str = "/health";

/// Main configuration structure for the fsgate gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server and logging.
    pub server: ServerConfig,

    /// Storage backend selection.
    pub storage: StorageConfig,

    /// Token secret and cipher settings.
    pub security: SecurityConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,

    /// Public origin used when building delivery URLs.
    pub base_url: String,

    /// Path of the delivery route.
    pub action: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Zip,
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Root directory of the local backend.
    pub root: PathBuf,

    /// Archive file of the zip backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,

    /// Prefix applied to every path handed to the filesystem.
    pub prefix: String,

    /// Report missing backend capabilities as errors.
    pub debug: bool,

    /// Origin for native public URLs of the local backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

/// Security settings.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Passphrase the token key is derived from.
    pub secret: String,

    /// Source for the IV. Falls back to `app_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    /// Application identifier, used as the IV source when `iv` is unset.
    pub app_id: String,

    /// Token cipher name.
    pub cipher: String,

    /// Lifetime in seconds of URLs minted with `fsgate url --temporary`.
    pub default_expiry: u64,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("secret", &"[REDACTED]")
            .field("iv", &self.iv.as_ref().map(|_| "[REDACTED]"))
            .field("app_id", &self.app_id)
            .field("cipher", &self.cipher)
            .field("default_expiry", &self.default_expiry)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            base_url: "http://127.0.0.1:8080".to_string(),
            action: "/site/file".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: default_data_dir().join("storage"),
            archive: None,
            prefix: String::new(),
            debug: false,
            public_base_url: None,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            iv: None,
            app_id: "fsgate".to_string(),
            cipher: CipherAlgorithm::default().name().to_string(),
            default_expiry: 300, // 5 minutes
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsgate")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsgate")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values. Empty
    /// values are ignored. Supported variables:
    /// - FSGATE_SECRET: token secret
    /// - FSGATE_BASE_URL: public origin for delivery URLs
    /// - FSGATE_LOG_LEVEL: log level (trace, debug, info, warn, error)
    /// - FSGATE_STORAGE_ROOT: root directory of the local backend
    pub fn apply_env_overrides(&mut self) {
        if let Some(secret) = env_value("FSGATE_SECRET") {
            tracing::info!("Overriding secret from environment");
            self.security.secret = secret;
        }

        if let Some(url) = env_value("FSGATE_BASE_URL") {
            tracing::info!("Overriding base_url from environment: {}", url);
            self.server.base_url = url;
        }

        if let Some(level) = env_value("FSGATE_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.server.log_level = level;
        }

        if let Some(root) = env_value("FSGATE_STORAGE_ROOT") {
            tracing::info!("Overriding storage root from environment: {}", root);
            self.storage.root = PathBuf::from(root);
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        self.cipher_algorithm()?;

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        if !is_http_url(&self.server.base_url) {
            return Err(ConfigError::InvalidBaseUrl(self.server.base_url.clone()));
        }

        let action = &self.server.action;
        if !action.starts_with('/')
            || action.len() < 2
            || action == HEALTH_PATH
            || action.contains(['?', '#', '{', '}', '*', ' '])
        {
            return Err(ConfigError::InvalidAction(action.clone()));
        }

        self.bind_addr()?;

        if self.storage.backend == StorageBackend::Zip && self.storage.archive.is_none() {
            return Err(ConfigError::MissingArchive);
        }

        if self.security.default_expiry == 0 || self.security.default_expiry > MAX_DEFAULT_EXPIRY {
            return Err(ConfigError::InvalidDefaultExpiry(
                self.security.default_expiry,
            ));
        }

        if let Some(url) = &self.storage.public_base_url {
            if !is_http_url(url) {
                return Err(ConfigError::InvalidPublicBaseUrl(url.clone()));
            }
        }

        Ok(())
    }

    /// The configured token cipher.
    pub fn cipher_algorithm(&self) -> Result<CipherAlgorithm, ConfigError> {
        self.security
            .cipher
            .parse()
            .map_err(|_| ConfigError::UnsupportedCipher(self.security.cipher.clone()))
    }

    /// The configured listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))
    }

    /// Lifetime of URLs minted without an explicit expiry.
    pub fn default_expiry(&self) -> Duration {
        Duration::from_secs(self.security.default_expiry)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
