pub mod interface;
pub mod pump;
pub mod session;

pub use interface::{ConnectionReader, SerialConnection, SerialportConnection};
pub use pump::{PumpEvent, PumpMessage, ReaderPump};
pub use session::PortSession;

use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};

/// Line parameters applied to an open port. Only the baud rate varies;
/// framing is always 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl PortConfig {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }

    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        Self { baud_rate, ..self }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BAUD_RATE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Parameters rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// Classify a failure to obtain a device handle. The host refusing access
    /// is reported separately from the device being unusable.
    pub fn from_open_error(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                SerialError::PermissionDenied(err.description)
            }
            _ => SerialError::SerialportError(err),
        }
    }

    pub fn is_permission_error(&self) -> bool {
        match self {
            SerialError::PermissionDenied(_) => true,
            SerialError::IoError(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_config_is_8n1() {
        let config = PortConfig::new(115_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.with_baud_rate(9600).baud_rate, 9600);
        assert_eq!(PortConfig::default().baud_rate, 460_800);
    }

    #[test]
    fn test_open_error_classification() {
        let denied = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "Permission denied",
        );
        assert!(SerialError::from_open_error(denied).is_permission_error());

        let missing = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(!SerialError::from_open_error(missing).is_permission_error());
    }
}
