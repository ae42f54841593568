//! eventwire configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::BusOptions;
use crate::guard::BackoffPolicy;

/// Main eventwire configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Server endpoints
    pub server: ServerConfig,

    /// Rate-limit guard tuning
    pub guard: GuardConfig,

    /// Event bus tuning
    pub bus: BusConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .eventwire.yml
        let local_config = PathBuf::from(".eventwire.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/eventwire/eventwire.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: a broken config file is reported properly by the
    /// full `load` once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".eventwire.yml")];
                paths.extend(Self::user_config_path());
                paths
            }
        };

        candidates
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("eventwire").join("eventwire.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Server endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Path of the server-push event stream
    #[serde(rename = "events-path")]
    pub events_path: String,

    /// Path of the streamed chat endpoint
    #[serde(rename = "chat-path")]
    pub chat_path: String,

    /// Environment variable holding the bearer token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Connect timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            events_path: "/api/events".to_string(),
            chat_path: "/api/chat/stream".to_string(),
            token_env: "EVENTWIRE_TOKEN".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl ServerConfig {
    /// Join the base URL with an absolute or relative path
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Bearer token from the environment, if set
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Rate-limit guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// First retry delay in milliseconds
    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any retry delay
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Retries per invocation before a throttling error is returned
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// How long a successful result suppresses identical calls
    #[serde(rename = "suppress-ttl-ms")]
    pub suppress_ttl_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_retries: 3,
            suppress_ttl_ms: 3000,
        }
    }
}

impl GuardConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn suppress_ttl(&self) -> Duration {
        Duration::from_millis(self.suppress_ttl_ms)
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// First reconnect delay in milliseconds
    #[serde(rename = "reconnect-initial-ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the reconnect delay
    #[serde(rename = "reconnect-max-ms")]
    pub reconnect_max_ms: u64,

    /// A connection open this long resets the reconnect delay
    #[serde(rename = "stable-grace-ms")]
    pub stable_grace_ms: u64,

    /// Consecutive auth rejections before giving up
    #[serde(rename = "max-auth-failures")]
    pub max_auth_failures: u32,

    /// Whether subscribing opens a connection that was never disconnected
    #[serde(rename = "connect-on-subscribe")]
    pub connect_on_subscribe: bool,

    /// Capacity of the broadcast tap
    #[serde(rename = "dispatch-buffer")]
    pub dispatch_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
            stable_grace_ms: 5000,
            max_auth_failures: 2,
            connect_on_subscribe: true,
            dispatch_buffer: 256,
        }
    }
}

impl BusConfig {
    pub fn options(&self) -> BusOptions {
        BusOptions {
            reconnect: BackoffPolicy::new(
                Duration::from_millis(self.reconnect_initial_ms),
                Duration::from_millis(self.reconnect_max_ms),
            ),
            stable_grace: Duration::from_millis(self.stable_grace_ms),
            max_auth_failures: self.max_auth_failures.max(1),
            connect_on_subscribe: self.connect_on_subscribe,
            dispatch_buffer: self.dispatch_buffer.max(1),
        }
    }
}
