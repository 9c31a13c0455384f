//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SensorConfig: where the lux sensor lives and where its setup endpoint is.
//!     - PollingConfig: default interval and test duration for a session.
//!     - ExportConfig: spreadsheet directory and manual-stop export policy.
//!     - PersistenceConfig: snapshot file and the key readings are stored under.
//!     - ServerConfig: dashboard bind address.
//!     - LoggingConfig: log level and per-reading echo.
//!
//! ==============================================================================

use crate::error::ConfigError;
use crate::poll::PollSettings;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub sensor: SensorConfig,
    pub polling: PollingConfig,
    pub export: ExportConfig,
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorConfig {
    /// host or host:port of the sensor (GET http://<address>/lux)
    pub address: String,
    /// fixed host of the device setup endpoint (POST http://<setup_host>/setip)
    pub setup_host: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub duration_minutes: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub directory: PathBuf,
    /// also export when a running test is stopped by hand
    pub on_manual_stop: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceConfig {
    pub path: PathBuf,
    pub key: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            address: "192.168.2.123".to_string(),
            setup_host: "10.0.0.201".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 1, duration_minutes: 1.0 }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from("exports"), on_manual_stop: true }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("storage.json"),
            key: "readingStoreData".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: HostConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is initialized (the level comes from this file),
    /// so it reports on stdout.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// reject values the dashboard inputs would not allow
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.poll_settings().validate()?;
        if self.sensor.timeout_ms == 0 {
            return Err(ConfigError::invalid("sensor.timeout_ms", "must be positive"));
        }
        if self.persistence.key.is_empty() {
            return Err(ConfigError::invalid("persistence.key", "must not be empty"));
        }
        Ok(())
    }

    /// initial session settings derived from [sensor] and [polling]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            address: self.sensor.address.clone(),
            interval_seconds: self.polling.interval_seconds,
            duration_minutes: self.polling.duration_minutes,
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Sensor: {}", self.sensor.address);
        println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        println!("│ Test Duration: {} min", self.polling.duration_minutes);
        println!("│ Export Dir: {}", self.export.directory.display());
        println!("│ Snapshot: {}", self.persistence.path.display());
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
