//! Configuration: YAML loading, defaults, and fail-fast validation.
//!
//! All engine knobs (probe interval/timeout, window sizing, classification
//! threshold, hysteresis counts, concurrency and event-ring capacity) are
//! validated once at startup; an invalid combination is a startup error,
//! never a silent runtime degradation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Default probe interval (1.5 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1500);

/// Default per-probe timeout (1 second).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bounded-history capacity per target.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Default minimum samples before classification.
pub const DEFAULT_MIN_SAMPLES: usize = 5;

/// Default absolute Z-score threshold for anomalies.
pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Default consecutive failures before declaring Down.
pub const DEFAULT_FAIL_THRESHOLD: u32 = 3;

/// Default consecutive successes before recovering to Up.
pub const DEFAULT_RECOVER_THRESHOLD: u32 = 1;

/// Default cap on concurrent in-flight probes.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Default event broadcast ring capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

fn default_enabled() -> bool {
    true
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_z_threshold() -> f64 {
    DEFAULT_Z_THRESHOLD
}

fn default_fail_threshold() -> u32 {
    DEFAULT_FAIL_THRESHOLD
}

fn default_recover_threshold() -> u32 {
    DEFAULT_RECOVER_THRESHOLD
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or write the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

// =============================================================================
// Target configuration
// =============================================================================

/// One monitored host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Unique name for this target.
    pub name: String,
    /// Target host (hostname or IP address).
    pub host: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Monitor this target (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl TargetConfig {
    /// Create a new target configuration.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            description: None,
            enabled: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// =============================================================================
// Engine configuration
// =============================================================================

/// Probing, statistics and classification parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between probe firings per target (default: 1.5s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe timeout; must be shorter than the interval (default: 1s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Bounded latency-history capacity per target (default: 100).
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Minimum samples before a Z-score is meaningful (default: 5).
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Absolute Z-score at or above which a sample is anomalous (default: 3).
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,

    /// Consecutive failures before declaring a target Down (default: 3).
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// Consecutive successes before recovering to Up (default: 1).
    #[serde(default = "default_recover_threshold")]
    pub recover_threshold: u32,

    /// Cap on concurrent in-flight probes across all targets (default: 64).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Event broadcast ring capacity (default: 1024).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            min_samples: DEFAULT_MIN_SAMPLES,
            z_threshold: DEFAULT_Z_THRESHOLD,
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            recover_threshold: DEFAULT_RECOVER_THRESHOLD,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Validate engine parameters.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "timeout must be positive".to_string(),
            ));
        }
        if self.timeout >= self.interval {
            return Err(ConfigError::Validation(format!(
                "timeout ({:?}) must be shorter than interval ({:?})",
                self.timeout, self.interval
            )));
        }
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(ConfigError::Validation(format!(
                "z_threshold must be a positive finite number, got {}",
                self.z_threshold
            )));
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::Validation(
                "window_capacity must be positive".to_string(),
            ));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::Validation(
                "min_samples must be positive".to_string(),
            ));
        }
        if self.window_capacity < self.min_samples {
            return Err(ConfigError::Validation(format!(
                "window_capacity ({}) must be at least min_samples ({})",
                self.window_capacity, self.min_samples
            )));
        }
        if self.fail_threshold == 0 || self.recover_threshold == 0 {
            return Err(ConfigError::Validation(
                "hysteresis thresholds must be positive".to_string(),
            ));
        }
        if self.recover_threshold > self.fail_threshold {
            return Err(ConfigError::Validation(format!(
                "recover_threshold ({}) must not exceed fail_threshold ({}); \
                 recovery is meant to be faster than declaring down",
                self.recover_threshold, self.fail_threshold
            )));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "max_in_flight must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Validation(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Application configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine parameters.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Monitored targets.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, creating a default file if none exists.
    ///
    /// The generated file carries the well-known Cloudflare and Google DNS
    /// resolvers so the monitor is useful out of the box.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::with_default_targets();
        let yaml = serde_yaml::to_string(&config)?;
        std::fs::write(path, yaml)?;
        tracing::info!(path = %path.display(), "Created default configuration file");
        Ok(config)
    }

    /// Default configuration with the stock resolver target set.
    pub fn with_default_targets() -> Self {
        Self {
            engine: EngineConfig::default(),
            targets: vec![
                TargetConfig::new("cloudflare-primary", "1.1.1.1")
                    .with_description("Cloudflare DNS Primary"),
                TargetConfig::new("cloudflare-secondary", "1.0.0.1")
                    .with_description("Cloudflare DNS Secondary"),
                TargetConfig::new("google-primary", "8.8.8.8")
                    .with_description("Google DNS Primary"),
                TargetConfig::new("google-secondary", "8.8.4.4")
                    .with_description("Google DNS Secondary"),
            ],
        }
    }

    /// Validate engine parameters and the target list.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        let mut seen_names = std::collections::HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "target name cannot be empty".to_string(),
                ));
            }
            if target.host.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "target '{}' has an empty host",
                    target.name
                )));
            }
            if !seen_names.insert(&target.name) {
                return Err(ConfigError::Validation(format!(
                    "duplicate target name: '{}'",
                    target.name
                )));
            }
        }
        Ok(())
    }

    /// Targets that are enabled for monitoring.
    pub fn enabled_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.interval, DEFAULT_INTERVAL);
        assert_eq!(engine.timeout, DEFAULT_TIMEOUT);
        assert_eq!(engine.window_capacity, DEFAULT_WINDOW_CAPACITY);
        assert_eq!(engine.min_samples, DEFAULT_MIN_SAMPLES);
        assert_eq!(engine.z_threshold, DEFAULT_Z_THRESHOLD);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_validation_timeout_vs_interval() {
        let engine = EngineConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let err = engine.validate().unwrap_err();
        assert!(err.to_string().contains("shorter than interval"));
    }

    #[test]
    fn test_validation_z_threshold() {
        let engine = EngineConfig {
            z_threshold: 0.0,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());

        let engine = EngineConfig {
            z_threshold: f64::NAN,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_validation_window_vs_min_samples() {
        let engine = EngineConfig {
            window_capacity: 3,
            min_samples: 5,
            ..EngineConfig::default()
        };
        let err = engine.validate().unwrap_err();
        assert!(err.to_string().contains("at least min_samples"));
    }

    #[test]
    fn test_validation_hysteresis_asymmetry() {
        let engine = EngineConfig {
            fail_threshold: 2,
            recover_threshold: 3,
            ..EngineConfig::default()
        };
        let err = engine.validate().unwrap_err();
        assert!(err.to_string().contains("recover_threshold"));
    }

    #[test]
    fn test_app_config_duplicate_targets() {
        let config = AppConfig {
            engine: EngineConfig::default(),
            targets: vec![
                TargetConfig::new("same", "1.1.1.1"),
                TargetConfig::new("same", "8.8.8.8"),
            ],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_yaml_roundtrip_with_humantime() {
        let yaml = r#"
engine:
  interval: 2s
  timeout: 500ms
  window_capacity: 50
  z_threshold: 2.5
targets:
  - name: gateway
    host: 192.168.1.1
    description: Home router
  - name: disabled-one
    host: 10.0.0.1
    enabled: false
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.engine.interval, Duration::from_secs(2));
        assert_eq!(config.engine.timeout, Duration::from_millis(500));
        assert_eq!(config.engine.window_capacity, 50);
        assert_eq!(config.engine.z_threshold, 2.5);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.engine.min_samples, DEFAULT_MIN_SAMPLES);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.enabled_targets().count(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icmpmon.yaml");

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.targets.len(), 4);
        assert_eq!(created.targets[0].host, "1.1.1.1");

        // Second load reads the file back identically.
        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.targets.len(), 4);
        assert_eq!(loaded.engine.interval, DEFAULT_INTERVAL);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(dir.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
