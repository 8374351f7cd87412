//! Client settings
//!
//! Loaded from a JSON file. Everything except the blob locations has a
//! default.
//!
//! ```json
//! {
//!   "blob_locations": [
//!     { "account": "configstore1", "root": "./blobs/1" },
//!     { "account": "configstore2", "root": "./blobs/2" },
//!     { "account": "configstore3", "root": "./blobs/3" }
//!   ],
//!   "lock_timeout_secs": 10
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{log_event, Event, Logger, Severity};
use crate::quorum::{BlobLocation, BlobStore, ConfigurationService, LocalBlobStore, QuorumResult};
use crate::row::RowSettings;

/// Result type for settings
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Settings errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid settings JSON: {0}")]
    Parse(String),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

impl SettingsError {
    pub fn code(&self) -> &'static str {
        match self {
            SettingsError::Read { .. } => "RT_SETTINGS_READ",
            SettingsError::Parse(_) => "RT_SETTINGS_PARSE",
            SettingsError::Invalid(_) => "RT_SETTINGS_INVALID",
        }
    }
}

/// One configuration blob location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocationSettings {
    /// Storage account name
    pub account: String,

    /// Directory holding this account's blobs
    pub root: PathBuf,
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Configuration blob locations (required, at least one)
    pub blob_locations: Vec<BlobLocationSettings>,

    /// Blob name under which configurations are stored (default: "RTableConfig")
    #[serde(default = "default_blob_name")]
    pub blob_name: String,

    /// Row lock timeout in seconds (default: 10)
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Delay before retrying a retriable row failure (default: 100ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-location configuration read timeout (default: 5000ms)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Minimum log severity (default: "INFO")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_blob_name() -> String {
    "RTableConfig".to_string()
}
fn default_lock_timeout_secs() -> u64 {
    10
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl ClientSettings {
    /// Settings with defaults for the given locations.
    pub fn new(blob_locations: Vec<BlobLocationSettings>) -> Self {
        Self {
            blob_locations,
            blob_name: default_blob_name(),
            lock_timeout_secs: default_lock_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            log_level: default_log_level(),
        }
    }

    /// Load and validate settings from `path`.
    ///
    /// Relative blob roots are resolved against the settings file's
    /// directory.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut settings: ClientSettings =
            serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;

        if let Some(base) = path.parent() {
            for location in &mut settings.blob_locations {
                if location.root.is_relative() {
                    location.root = base.join(&location.root);
                }
            }
        }
        settings.validate()?;

        let locations = settings.blob_locations.len().to_string();
        log_event(
            Event::SettingsLoaded,
            &[
                ("blob_name", &settings.blob_name),
                ("locations", &locations),
                ("path", &path.display().to_string()),
            ],
        );
        Ok(settings)
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if self.blob_locations.is_empty() {
            return Err(SettingsError::Invalid(
                "blob_locations must name at least one location".to_string(),
            ));
        }
        let mut accounts = std::collections::HashSet::new();
        for location in &self.blob_locations {
            if location.account.is_empty() {
                return Err(SettingsError::Invalid(
                    "blob location account must not be empty".to_string(),
                ));
            }
            if !accounts.insert(location.account.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "blob location account '{}' listed twice",
                    location.account
                )));
            }
        }
        if self.blob_name.is_empty() {
            return Err(SettingsError::Invalid("blob_name must not be empty".to_string()));
        }
        if self.lock_timeout_secs == 0 {
            return Err(SettingsError::Invalid("lock_timeout_secs must be > 0".to_string()));
        }
        if self.retry_delay_ms == 0 {
            return Err(SettingsError::Invalid("retry_delay_ms must be > 0".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(SettingsError::Invalid("read_timeout_ms must be > 0".to_string()));
        }
        self.severity()?;
        Ok(())
    }

    pub fn severity(&self) -> SettingsResult<Severity> {
        self.log_level.parse().map_err(SettingsError::Invalid)
    }

    /// Install the configured log level process-wide.
    pub fn apply_log_level(&self) -> SettingsResult<()> {
        Logger::set_min_severity(self.severity()?);
        Ok(())
    }

    pub fn row_settings(&self) -> RowSettings {
        RowSettings {
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Quorum service over filesystem blob stores at the configured roots.
    pub fn configuration_service(&self) -> QuorumResult<ConfigurationService> {
        let locations = self
            .blob_locations
            .iter()
            .map(|location| {
                let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&location.root));
                BlobLocation::new(location.account.clone(), store)
            })
            .collect();
        Ok(ConfigurationService::new(self.blob_name.clone(), locations)?
            .with_timeout(self.read_timeout()))
    }
}
