//! Watcher configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::FilterCriteria;
use crate::{AppError, Result};

/// Directory watched when neither the config file nor the CLI names one.
pub const DEFAULT_SYNAPSE_PATH: &str = "THE_SYNAPSE/active";

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_SYNAPSE_PATH)
}

fn default_poll_interval_seconds() -> f64 {
    1.0
}

/// Watcher configuration, usually parsed from `synapse-watch.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct WatcherConfig {
    /// Directory holding one `*.json` file per message.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Seconds between poll cycles. Must be positive.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: f64,
    /// Wake the poll loop early on file-system events.
    #[serde(default)]
    pub fs_events: bool,
    /// Criteria a message must match to be dispatched.
    #[serde(default)]
    pub filter: FilterCriteria,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            poll_interval_seconds: default_poll_interval_seconds(),
            fs_events: false,
            filter: FilterCriteria::default(),
        }
    }
}

impl WatcherConfig {
    /// Configuration watching `path` with defaults for everything else.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Only the syntax and the poll interval are checked here; the watched
    /// directory is checked by [`validate`](Self::validate) once CLI
    /// overrides have been applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing fails or the interval is invalid.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate_interval()?;
        Ok(config)
    }

    /// Validate the interval and the watched directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the interval is not a positive finite
    /// number of seconds, or if `path` does not exist or is not a directory.
    pub fn validate(&self) -> Result<()> {
        self.validate_interval()?;

        let meta = fs::metadata(&self.path).map_err(|err| {
            AppError::Config(format!(
                "watched path {} is not accessible: {err}",
                self.path.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(AppError::Config(format!(
                "watched path {} is not a directory",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Poll interval as a [`Duration`]. Call after validation.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_seconds).unwrap_or(Duration::from_secs(1))
    }

    fn validate_interval(&self) -> Result<()> {
        let secs = self.poll_interval_seconds;
        if !secs.is_finite() || secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
            return Err(AppError::Config(format!(
                "poll_interval_seconds must be a positive number of seconds, got {secs}"
            )));
        }
        Ok(())
    }
}
