//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. `config/emf_daq.toml` (or the file passed on the command line), optional
//! 3. Environment variables prefixed `EMF_DAQ_`, `__` separating sections
//!    (e.g. `EMF_DAQ_DEVICE__PORT=/dev/ttyUSB0`)
//! 4. `INFLUXDB_TOKEN`, mapped to `sink.token`
//! 5. Command-line overrides ([`Overrides`])
//!
//! # Example
//! ```no_run
//! use emf_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Polling {} every {:?}", config.device.port, config.poller.interval);
//! # Ok::<(), emf_daq::error::DaqError>(())
//! ```
//!
//! ```toml
//! [device]
//! port = "/dev/gqemf390"
//! baud_rate = 57600
//! settle_delay = "100ms"
//!
//! [poller]
//! interval = "20s"
//! commands = ["emf", "ef", "rf_band", "mode"]
//!
//! [sink]
//! kind = "influxdb"
//! org = "lab"
//! bucket = "health_data"
//!
//! [sink.tags]
//! device = "gq_emf390"
//! ```

use crate::error::{AppResult, DaqError};
use crate::instrument::command::Command;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/emf_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial device settings
    pub device: DeviceConfig,
    /// Poll loop settings
    pub poller: PollerConfig,
    /// Time-series sink settings
    pub sink: SinkConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format (for production)
    Compact,
    /// JSON format (for log aggregation)
    Json,
}

/// Serial device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound for one command exchange
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Pause between writing a command and reading the reply
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Silence after which a reply is considered complete
    #[serde(with = "humantime_serde")]
    pub idle_gap: Duration,
}

/// Poll loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between the end of one tick and the start of the next
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Commands issued each tick, in order
    pub commands: Vec<Command>,
    /// Tag band-sweep aggregates with the current mode
    pub tag_mode: bool,
    /// Reopen attempts after a mid-run transport error before giving up
    pub max_reconnect_attempts: u32,
}

/// Sink backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// InfluxDB v2 HTTP write API
    InfluxDb,
    /// Log every point instead of storing it
    Log,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Backend
    pub kind: SinkKind,
    /// Base URL of the InfluxDB server
    pub url: String,
    /// InfluxDB organization
    pub org: String,
    /// InfluxDB bucket
    pub bucket: String,
    /// API token, normally supplied through `INFLUXDB_TOKEN`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Measurement name for every point
    pub measurement: String,
    /// HTTP request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Tags attached to every point
    pub tags: BTreeMap<String, String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "emf_daq".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/gqemf390".to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            idle_gap: Duration::from_millis(20),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            commands: vec![Command::Emf, Command::Ef, Command::RfBand, Command::Mode],
            tag_mode: true,
            max_reconnect_attempts: 1,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::InfluxDb,
            url: "http://localhost:8086".to_string(),
            org: String::new(),
            bucket: "health_data".to_string(),
            token: None,
            measurement: "emf390_data".to_string(),
            timeout: Duration::from_secs(5),
            tags: BTreeMap::from([("device".to_string(), "gq_emf390".to_string())]),
        }
    }
}

/// Values supplied on the command line, applied last.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Serial port path
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: Option<u32>,
    /// Poll interval in whole seconds
    pub interval_secs: Option<u64>,
    /// Replace the configured sink with [`SinkKind::Log`]
    pub dry_run: bool,
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment, then validate.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: AppConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` and the environment, apply command-line overrides, then validate.
    ///
    /// Validation runs once, after the overrides, so that e.g. `--dry-run` can stand in
    /// for an incomplete `[sink]` section.
    pub fn load_with<P: AsRef<Path>>(path: P, overrides: &Overrides) -> AppResult<Self> {
        let config: AppConfig = Self::figment(path).extract()?;
        config.with_overrides(overrides)
    }

    /// The layered provider stack, exposed for inspection and tests.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EMF_DAQ_").split("__"))
            .merge(
                Env::raw()
                    .only(&["INFLUXDB_TOKEN"])
                    .map(|_| "sink.token".into()),
            )
    }

    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(mut self, overrides: &Overrides) -> AppResult<Self> {
        if let Some(port) = &overrides.port {
            self.device.port = port.clone();
        }
        if let Some(baud_rate) = overrides.baud_rate {
            self.device.baud_rate = baud_rate;
        }
        if let Some(secs) = overrides.interval_secs {
            self.poller.interval = Duration::from_secs(secs);
        }
        if overrides.dry_run {
            self.sink.kind = SinkKind::Log;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.device.port.trim().is_empty() {
            return Err(invalid("device.port must not be empty"));
        }
        if self.device.baud_rate == 0 {
            return Err(invalid("device.baud_rate must be greater than 0"));
        }
        if self.device.settle_delay >= self.device.timeout {
            return Err(invalid(format!(
                "device.settle_delay ({:?}) must be shorter than device.timeout ({:?})",
                self.device.settle_delay, self.device.timeout
            )));
        }

        if self.poller.interval.is_zero() {
            return Err(invalid("poller.interval must be greater than 0"));
        }
        if self.poller.commands.is_empty() {
            return Err(invalid("poller.commands must list at least one command"));
        }
        let mut seen = HashSet::new();
        for command in &self.poller.commands {
            if !seen.insert(command) {
                return Err(invalid(format!("Duplicate command in poller.commands: {command}")));
            }
        }

        if self.sink.measurement.trim().is_empty() {
            return Err(invalid("sink.measurement must not be empty"));
        }
        if self.sink.kind == SinkKind::InfluxDb {
            if self.sink.org.trim().is_empty() {
                return Err(invalid("sink.org is required for the influxdb sink"));
            }
            if self.sink.bucket.trim().is_empty() {
                return Err(invalid("sink.bucket is required for the influxdb sink"));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> DaqError {
    DaqError::Configuration(message.into())
}
