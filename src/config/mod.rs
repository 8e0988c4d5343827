pub mod bridge;

pub use bridge::{BridgeConfig, ConfigError, DEFAULT_BAUD_RATE, DEFAULT_WRITE_TIMEOUT_MS};
