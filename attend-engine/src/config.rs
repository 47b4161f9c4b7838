//! Configuration for the sync engine.
//!
//! Loaded from a TOML file; every setting has a default so a minimal
//! file only lists devices.

use attend_types::DeviceId;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration: global settings plus the device list.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Global sync settings.
    #[serde(default)]
    pub settings: Settings,
    /// Configured terminals.
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

/// Global sync settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Seconds between scheduled sync cycles (default: 3600).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Connection/fetch attempts per device per cycle (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Days of punch history kept by the retention purge (default: 30).
    #[serde(default = "default_data_retention_days")]
    pub data_retention_days: u32,
    /// Maximum devices synced concurrently within a cycle (default: 4).
    #[serde(default = "default_max_parallel_devices")]
    pub max_parallel_devices: usize,
}

impl Settings {
    /// The sync interval as a [`Duration`].
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// The connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Identity and reachability of one terminal.
///
/// Immutable once loaded for a cycle; owned by configuration and
/// borrowed by the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device identifier.
    pub device_id: DeviceId,
    /// Display name for logs and reports.
    pub name: String,
    /// Network address (IP or hostname).
    pub address: String,
    /// Device port (default: 4370, the common terminal port).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional device password, passed through to the protocol layer.
    #[serde(default)]
    pub password: Option<String>,
    /// Disabled devices are skipped by every cycle.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_sync_interval_secs() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_data_retention_days() -> u32 {
    30
}

fn default_max_parallel_devices() -> usize {
    4
}

fn default_port() -> u16 {
    4370
}

fn default_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            max_retries: default_max_retries(),
            connect_timeout_secs: default_connect_timeout_secs(),
            data_retention_days: default_data_retention_days(),
            max_parallel_devices: default_max_parallel_devices(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the device list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "no devices configured".into(),
            });
        }
        for device in &self.devices {
            if device.device_id.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("device '{}' has an empty device_id", device.name),
                });
            }
            if device.name.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("device '{}' has an empty name", device.device_id),
                });
            }
            if device.address.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("device '{}' has an empty address", device.device_id),
                });
            }
            if device.port == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("device '{}' has port 0", device.device_id),
                });
            }
        }
        Ok(())
    }

    /// Devices with the enabled flag set.
    pub fn enabled_devices(&self) -> Vec<&DeviceDescriptor> {
        self.devices.iter().filter(|d| d.enabled).collect()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// The configuration parsed but fails validation.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}
