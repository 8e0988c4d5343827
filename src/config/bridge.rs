use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::PortConfig;

// Defaults matching what USB-serial adapter firmware expects out of the box
pub const DEFAULT_BAUD_RATE: u32 = 460_800;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_READ_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Runtime tunables for the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Baud rate used by `open` when the caller does not pass one
    pub default_baud_rate: u32,
    /// Upper bound for a single `write`
    pub write_timeout_ms: u64,
    /// How often a blocked read wakes up to check whether the pump was stopped.
    /// This is not a data timeout: a read with no data is simply retried.
    pub read_poll_interval_ms: u64,
    pub read_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_baud_rate: DEFAULT_BAUD_RATE,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            read_poll_interval_ms: DEFAULT_READ_POLL_INTERVAL_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON document; missing fields fall back to their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded bridge config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_baud_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "defaultBaudRate",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.read_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "readPollIntervalMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "readBufferSize",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_poll_interval(&self) -> Duration {
        Duration::from_millis(self.read_poll_interval_ms)
    }

    /// Line parameters for a port opened at `baud_rate`, or at the default rate
    pub fn port_config(&self, baud_rate: Option<u32>) -> PortConfig {
        PortConfig::new(baud_rate.unwrap_or(self.default_baud_rate))
    }
}
