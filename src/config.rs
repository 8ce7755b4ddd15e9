//! Configuration management for the rate limiter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RateLimitError, Result};

/// Prefix prepended to every namespace to form its durable storage key.
pub const DEFAULT_STORAGE_PREFIX: &str = "hireall_ratelimit_";

/// Main configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Prefix for durable storage keys
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    /// Maximum distinct identifiers kept per namespace record
    #[serde(default = "default_max_identifiers")]
    pub max_identifiers: usize,

    /// Optional timeout around each durable store call, in milliseconds
    #[serde(default)]
    pub storage_timeout_ms: Option<u64>,

    /// Periodic cleanup configuration
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Named limiters the host can build in one go
    #[serde(default)]
    pub presets: Vec<LimiterPreset>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_prefix: default_storage_prefix(),
            max_identifiers: default_max_identifiers(),
            storage_timeout_ms: None,
            cleanup: CleanupConfig::default(),
            presets: Vec::new(),
        }
    }
}

/// Cleanup trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Name under which the trigger is registered with the scheduler
    #[serde(default = "default_alarm_name")]
    pub alarm_name: String,

    /// Minutes between cleanup passes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            alarm_name: default_alarm_name(),
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl CleanupConfig {
    /// Interval between cleanup passes.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

/// A named limiter definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterPreset {
    pub namespace: String,
    pub window_ms: u64,
    pub max_requests: u64,
}

fn default_storage_prefix() -> String {
    DEFAULT_STORAGE_PREFIX.to_string()
}

fn default_max_identifiers() -> usize {
    100
}

fn default_alarm_name() -> String {
    "ratelimit-cleanup".to_string()
}

fn default_interval_minutes() -> u64 {
    5
}

impl Settings {
    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| RateLimitError::Config(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an optional file, overlaid with `HIREALL_*`
    /// environment variables (nested keys separated by `__`, e.g.
    /// `HIREALL_CLEANUP__INTERVAL_MINUTES`).
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let path = path.as_ref();
            info!(path = %path.display(), "Loading rate limiter settings");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("HIREALL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateLimitError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the limiter meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_identifiers == 0 {
            return Err(RateLimitError::Config(
                "max_identifiers must be greater than zero".to_string(),
            ));
        }
        if self.cleanup.interval_minutes == 0 {
            return Err(RateLimitError::Config(
                "cleanup.interval_minutes must be greater than zero".to_string(),
            ));
        }
        if self.cleanup.interval_minutes.checked_mul(60).is_none() {
            return Err(RateLimitError::Config(format!(
                "cleanup.interval_minutes {} is too large",
                self.cleanup.interval_minutes
            )));
        }
        if self.storage_timeout_ms == Some(0) {
            return Err(RateLimitError::Config(
                "storage_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        for preset in &self.presets {
            validate_limits(&preset.namespace, preset.window_ms, preset.max_requests)?;
        }
        Ok(())
    }

    /// Timeout applied around durable store calls, if configured.
    pub fn storage_timeout(&self) -> Option<Duration> {
        self.storage_timeout_ms.map(Duration::from_millis)
    }

    /// Durable storage key for a namespace.
    pub fn storage_key(&self, namespace: &str) -> String {
        format!("{}{}", self.storage_prefix, namespace)
    }
}

/// Check the parameters of a single limiter.
pub fn validate_limits(namespace: &str, window_ms: u64, max_requests: u64) -> Result<()> {
    if namespace.is_empty() {
        return Err(RateLimitError::Config("namespace must not be empty".to_string()));
    }
    if window_ms == 0 {
        return Err(RateLimitError::Config(format!(
            "window_ms for '{}' must be greater than zero",
            namespace
        )));
    }
    if max_requests == 0 {
        return Err(RateLimitError::Config(format!(
            "max_requests for '{}' must be greater than zero",
            namespace
        )));
    }
    Ok(())
}
