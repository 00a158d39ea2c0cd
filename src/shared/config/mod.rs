//! Sync engine configuration
//!
//! Provides `SyncConfig`, its builder, and loading from a TOML file with
//! environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the backend URL
pub const ENV_SERVER_URL: &str = "DOCSYNC_SERVER_URL";
/// Environment variable overriding the bearer token
pub const ENV_API_TOKEN: &str = "DOCSYNC_API_TOKEN";
/// Environment variable overriding the durable queue location
pub const ENV_DB_PATH: &str = "DOCSYNC_DB_PATH";

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote backend
    pub server_url: Option<String>,
    /// Bearer token sent with every remote call
    pub api_token: Option<String>,
    /// SQLite file backing the durable queue
    pub database_path: Option<PathBuf>,
    /// Persist the queue; when false the queue lives in memory only
    pub durable: bool,
    /// Network status assumed until the platform reports otherwise
    pub start_online: bool,
    /// Periodic drain interval while online
    pub sync_interval: Duration,
    /// Quiet period collapsing enqueue bursts into one drain
    pub debounce: Duration,
    /// How long an optimistic entry may wait for acknowledgment
    pub rollback_timeout: Duration,
    /// Timeout applied to each HTTP request
    pub request_timeout: Duration,
    /// Failed attempts after which an operation is dead-lettered
    pub max_retries: u32,
    /// First backoff step
    pub base_delay: Duration,
    /// Backoff ceiling
    pub cap_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_token: None,
            database_path: None,
            durable: true,
            start_online: true,
            sync_interval: Duration::from_secs(30),
            debounce: Duration::from_millis(250),
            rollback_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::builder().toml(&text)?.env().build()
    }

    /// Location of the durable queue, falling back to the platform data dir
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(default_database_path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.server_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        if self.base_delay > self.cap_delay {
            return Err(ConfigError::invalid(
                "base_delay",
                "must not exceed cap_delay",
            ));
        }
        if self.rollback_timeout.is_zero() {
            return Err(ConfigError::invalid("rollback_timeout", "must be non-zero"));
        }
        Ok(())
    }
}

/// Platform-specific default path of the durable queue
fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("docsync");
    path.push("queue.db");
    path
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = Some(url.into());
        self
    }

    /// Set the bearer token
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    /// Set the durable queue location
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Keep the queue in memory only
    pub fn in_memory(mut self) -> Self {
        self.config.durable = false;
        self
    }

    pub fn start_online(mut self, online: bool) -> Self {
        self.config.start_online = online;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.config.debounce = debounce;
        self
    }

    pub fn rollback_timeout(mut self, timeout: Duration) -> Self {
        self.config.rollback_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the retry ceiling and backoff bounds
    pub fn retry(mut self, max_retries: u32, base_delay: Duration, cap_delay: Duration) -> Self {
        self.config.max_retries = max_retries;
        self.config.base_delay = base_delay;
        self.config.cap_delay = cap_delay;
        self
    }

    /// Apply settings from a TOML document
    pub fn toml(mut self, text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let config = &mut self.config;

        if let Some(url) = file.server_url {
            config.server_url = Some(url);
        }
        if let Some(token) = file.api_token {
            config.api_token = Some(token);
        }
        if let Some(path) = file.database_path {
            config.database_path = Some(path);
        }
        if let Some(durable) = file.durable {
            config.durable = durable;
        }
        if let Some(online) = file.start_online {
            config.start_online = online;
        }
        if let Some(secs) = file.timing.sync_interval_secs {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = file.timing.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = file.timing.rollback_timeout_secs {
            config.rollback_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.timing.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = file.retry.max_retries {
            config.max_retries = max;
        }
        if let Some(ms) = file.retry.base_delay_ms {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.retry.cap_delay_ms {
            config.cap_delay = Duration::from_millis(ms);
        }

        Ok(self)
    }

    /// Apply `DOCSYNC_*` environment overrides
    pub fn env(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            self.config.server_url = Some(url);
        }
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            self.config.api_token = Some(token);
        }
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            self.config.database_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    server_url: Option<String>,
    api_token: Option<String>,
    database_path: Option<PathBuf>,
    durable: Option<bool>,
    start_online: Option<bool>,
    #[serde(default)]
    timing: TimingSection,
    #[serde(default)]
    retry: RetrySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingSection {
    sync_interval_secs: Option<u64>,
    debounce_ms: Option<u64>,
    rollback_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    cap_delay_ms: Option<u64>,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("cannot read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
