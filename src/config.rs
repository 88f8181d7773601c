//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `recordtemp.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DatabaseConfig: where readings are written.
//!     - SensorConfig: GPIO pin and the driver's internal retry policy.
//!     - TimingConfig: warm-up, poll interval, and sensor-miss backoff.
//!     - LoggingConfig: default tracing filter.
//!
//! every section is optional; missing keys take the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub database: DatabaseConfig,
    pub sensor: SensorConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// schema name; also shown in the log-mode confirmation line
    pub name: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub gpio_pin: u8,
    /// interpreter used to run the adafruit driver
    pub python: String,
    /// a single driver run is killed after this long
    pub driver_timeout_ms: u64,
    /// attempts per poll inside the driver before reporting a miss
    pub retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub warmup_seconds: u64,
    pub interval_seconds: u64,
    pub backoff: BackoffConfig,
}

/// sensor-miss backoff
///
/// the defaults give a fixed 10s delay with no attempt limit.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_seconds: u64,
    pub multiplier: f64,
    pub max_seconds: u64,
    /// consecutive misses tolerated before giving up; unset = forever
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "logger".to_string(),
            password: String::new(),
            name: "temperatures".to_string(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 4,
            python: "python3".to_string(),
            driver_timeout_ms: 5000,
            retries: 15,
            retry_delay_ms: 2000,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warmup_seconds: 30,
            interval_seconds: 10,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_seconds: 10,
            multiplier: 1.0,
            max_seconds: 300,
            max_attempts: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl TimingConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load from the default search path, falling back to defaults
    ///
    /// runs before tracing is up, so what happened is returned in
    /// `LoadedConfig` and logged later with `report`.
    pub fn load_or_default() -> LoadedConfig {
        let paths = [
            PathBuf::from("config").join("recordtemp.toml"),
            PathBuf::from("..").join("config").join("recordtemp.toml"),
        ];

        let mut warnings = Vec::new();
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        return LoadedConfig { config, source: Some(path.clone()), warnings };
                    }
                    Err(e) => warnings.push(format!("Failed to load {}: {}", path.display(), e)),
                }
            }
        }

        LoadedConfig { config: Self::default(), source: None, warnings }
    }

    /// Log configuration summary (the password is never shown)
    pub fn print_summary(&self) {
        tracing::info!(
            host = %self.database.host,
            port = self.database.port,
            user = %self.database.user,
            database = %self.database.name,
            "[CONFIG] store"
        );
        tracing::info!(
            gpio_pin = self.sensor.gpio_pin,
            python = %self.sensor.python,
            retries = self.sensor.retries,
            retry_delay_ms = self.sensor.retry_delay_ms,
            warmup_s = self.timing.warmup_seconds,
            interval_s = self.timing.interval_seconds,
            backoff_s = self.timing.backoff.initial_seconds,
            "[CONFIG] sensor"
        );
    }
}

/// a config plus where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HostConfig,
    /// `None` when built-in defaults are in use
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn from_file(path: PathBuf) -> anyhow::Result<Self> {
        let config = HostConfig::load(&path)?;
        Ok(Self { config, source: Some(path), warnings: Vec::new() })
    }

    pub fn report(&self) {
        for warning in &self.warnings {
            tracing::warn!("[CONFIG] {}", warning);
        }
        match &self.source {
            Some(path) => tracing::info!("[CONFIG] Loaded from {}", path.display()),
            None => tracing::warn!("[CONFIG] No config file found - using defaults"),
        }
        self.config.print_summary();
    }
}
