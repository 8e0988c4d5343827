pub mod catalog;
pub mod manager;
pub mod models;
pub mod permission;

pub use catalog::DeviceCatalog;
pub use manager::DeviceManager;
pub use models::*;
pub use permission::{AccessOutcome, PendingAccess, PermissionNegotiator, PermissionResponder, PermissionResponse};

use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No USB serial device found. Connect the device via USB OTG cable.")]
    NotFound,

    #[error("USB permission denied by user")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Port not open")]
    NotOpen,

    #[error("A USB permission request is already in progress")]
    RequestInProgress,

    #[error("A port is already open; close it before opening another")]
    AlreadyOpen,

    #[error("Permission request cancelled")]
    Cancelled,

    #[error("Serial communication error: {0}")]
    SerialError(#[from] SerialError),
}

impl DeviceError {
    /// Stable error code reported to callers alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::NotFound => "NotFoundError",
            DeviceError::AccessDenied => "AccessDeniedError",
            DeviceError::InvalidArgument(_) => "InvalidArgumentError",
            DeviceError::NotOpen => "NotOpenError",
            DeviceError::RequestInProgress => "RequestInProgressError",
            DeviceError::AlreadyOpen => "ConflictError",
            DeviceError::Cancelled => "CancelledError",
            DeviceError::SerialError(e) if e.is_permission_error() => "PermissionError",
            DeviceError::SerialError(_) => "IOError",
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
