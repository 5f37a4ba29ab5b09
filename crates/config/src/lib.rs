//! Configuration loading, validation, and management for calltrace.
//!
//! Loads configuration from `~/.calltrace/config.toml` with environment
//! variable overrides. The analytics credential is resolved once here and
//! threaded into the proxy at construction time.

use calltrace_core::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.calltrace/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Analytics API key, sent with every tracked request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Remote tracking endpoint
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Relational log store
    #[serde(default)]
    pub log_store: LogStoreConfig,

    /// Interception behaviour
    #[serde(default)]
    pub proxy: ProxySettings,

    /// The wrapped LLM provider
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("tracking", &self.tracking)
            .field("log_store", &self.log_store)
            .field("proxy", &self.proxy)
            .field("provider", &self.provider)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tracking_url")]
    pub base_url: String,

    /// Request timeout for the tracking endpoint, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_tracking_url() -> String {
    "https://api.promptlayer.com".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_tracking_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreConfig {
    #[serde(default)]
    pub enabled: bool,

    /// SQLite database file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Table the records are written to. Must already exist.
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "analytics".into()
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            table: default_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Provider tag recorded with every call; selects the stream terminal predicate
    #[serde(default = "default_provider_kind")]
    pub provider: ProviderKind,

    /// First segment of every recorded function name
    #[serde(default = "default_root_name")]
    pub root_name: String,

    /// Member names returned without interception
    #[serde(default = "default_exempt")]
    pub exempt: Vec<String>,
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::OpenAi
}
fn default_root_name() -> String {
    "openai".into()
}
fn default_exempt() -> Vec<String> {
    vec!["count_tokens".into()]
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            provider: default_provider_kind(),
            root_name: default_root_name(),
            exempt: default_exempt(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_provider_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_provider_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_url(),
            default_model: default_model(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.calltrace/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CALLTRACE_API_KEY`, then `PROMPTLAYER_API_KEY` (analytics key)
    /// - `URL_API_PROMPTLAYER` (tracking endpoint)
    /// - `CALLTRACE_LOG_DB`, `CALLTRACE_LOG_TABLE` (log store)
    /// - `OPENAI_API_KEY`, `OPENAI_BASE_URL` (wrapped provider)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("CALLTRACE_API_KEY").or_else(|| lookup("PROMPTLAYER_API_KEY"));
        }

        if let Some(url) = lookup("URL_API_PROMPTLAYER") {
            self.tracking.base_url = url;
        }

        if let Some(path) = lookup("CALLTRACE_LOG_DB") {
            self.log_store.path = Some(PathBuf::from(path));
            self.log_store.enabled = true;
        }

        if let Some(table) = lookup("CALLTRACE_LOG_TABLE") {
            self.log_store.table = table;
        }

        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("OPENAI_API_KEY");
        }

        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.provider.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".calltrace")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracking.enabled && self.tracking.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "tracking.base_url must not be empty".into(),
            ));
        }

        if self.tracking.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tracking.timeout_secs must be > 0".into(),
            ));
        }

        if !is_identifier(&self.log_store.table) {
            return Err(ConfigError::ValidationError(format!(
                "log_store.table `{}` is not a plain identifier",
                self.log_store.table
            )));
        }

        if self.log_store.enabled && self.log_store.path.is_none() {
            return Err(ConfigError::ValidationError(
                "log_store.path is required when the log store is enabled".into(),
            ));
        }

        Ok(())
    }

    /// Fail-fast credential check.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingCredential(
                    "set CALLTRACE_API_KEY or PROMPTLAYER_API_KEY, or api_key in config.toml"
                        .into(),
                )
            })
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            tracking: TrackingConfig::default(),
            log_store: LogStoreConfig::default(),
            proxy: ProxySettings::default(),
            provider: ProviderConfig::default(),
        }
    }
}

/// Whether `name` is safe to splice into SQL as a table name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Missing analytics credential: {0}")]
    MissingCredential(String),
}
