//! # Sync Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TASKLANE_API_URL=https://api.example.com/v1                        │
//! │     TASKLANE_AUTO_SYNC=false                                           │
//! │     TASKLANE_SYNC_INTERVAL=120                                         │
//! │     TASKLANE_DB_PATH=/data/tasklane.db                                 │
//! │     TASKLANE_REQUEST_TIMEOUT=15                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tasklane/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/app.tasklane.tasklane/sync.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [api]
//! base_url = "https://api.tasklane.app/v1"
//! request_timeout_secs = 30
//!
//! [auth]
//! refresh_margin_secs = 60
//!
//! [sync]
//! auto_sync = true
//! interval_secs = 300
//! bootstrap_with_snapshot = true
//!
//! [storage]
//! database_path = "/home/me/.local/share/tasklane/tasklane.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Settings
// =============================================================================

/// Remote service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL every resource path is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bound on every network call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.tasklane.app/v1".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Auth Settings
// =============================================================================

/// Token lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// A token expiring within this margin is treated as expired.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    /// Lifetime assumed when neither `expiresIn` nor a JWT `exp` is available.
    #[serde(default = "default_token_lifetime")]
    pub default_token_lifetime_secs: u64,
}

fn default_refresh_margin() -> u64 {
    60
}
fn default_token_lifetime() -> u64 {
    3600
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            refresh_margin_secs: default_refresh_margin(),
            default_token_lifetime_secs: default_token_lifetime(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync pass and scheduler behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Use `GET /sync/snapshot` when no cursor exists yet.
    #[serde(default = "default_true")]
    pub bootstrap_with_snapshot: bool,

    /// Run scheduled passes in the background.
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Seconds between scheduled passes.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// First retry delay after a transient failure (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Retries after which a child still waiting for its parent is logged
    /// at warn level. The child stays parked either way.
    #[serde(default = "default_deferred_warn_attempts")]
    pub deferred_warn_attempts: u32,

    /// Days a tombstone is kept.
    #[serde(default = "default_tombstone_retention")]
    pub tombstone_retention_days: u32,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    300
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    600
}
fn default_deferred_warn_attempts() -> u32 {
    10
}
fn default_tombstone_retention() -> u32 {
    30
}
fn default_event_capacity() -> usize {
    64
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            bootstrap_with_snapshot: true,
            auto_sync: true,
            interval_secs: default_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            deferred_warn_attempts: default_deferred_warn_attempts(),
            tombstone_retention_days: default_tombstone_retention(),
            event_capacity: default_event_capacity(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load sync config, using defaults");
            Self::default()
        })
    }

    /// Saves configuration to file as pretty TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = url::Url::parse(&self.api.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Service URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        if url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(self.api.base_url.clone()));
        }

        if self.api.request_timeout_secs == 0 || self.api.connect_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "timeouts must be greater than 0".into(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval_secs must be greater than 0".into(),
            ));
        }
        if self.sync.event_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a variable lookup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TASKLANE_API_URL") {
            debug!(url = %url, "Overriding service URL from environment");
            self.api.base_url = url;
        }

        if let Some(value) = lookup("TASKLANE_AUTO_SYNC") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.sync.auto_sync = true,
                "0" | "false" | "off" | "no" => self.sync.auto_sync = false,
                _ => warn!(value = %value, "Unknown TASKLANE_AUTO_SYNC value"),
            }
        }

        if let Some(interval) = lookup("TASKLANE_SYNC_INTERVAL") {
            if let Ok(secs) = interval.parse::<u64>() {
                debug!(secs, "Overriding sync interval from environment");
                self.sync.interval_secs = secs;
            }
        }

        if let Some(path) = lookup("TASKLANE_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(timeout) = lookup("TASKLANE_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.api.request_timeout_secs = secs;
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("app", "tasklane", "tasklane")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Configured database path, or `tasklane.db` in the platform data
    /// directory, or the working directory as a last resort.
    pub fn database_path(&self) -> PathBuf {
        self.storage.database_path.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("tasklane.db"))
                .unwrap_or_else(|| PathBuf::from("tasklane.db"))
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auth.refresh_margin_secs as i64)
    }
}
