//! Payload framing for the application channel. Bytes cross the boundary as
//! base64 text in both directions.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::device::DeviceError;

/// Payload of the `data` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    pub data: String,
}

/// Payload of the `disconnected` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectedPayload {
    pub reason: String,
}

pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode caller-supplied base64. Embedded line breaks and spaces, as
/// produced by MIME-style encoders, are ignored.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, DeviceError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DeviceError::InvalidArgument(format!("data is not valid base64: {}", e)))
}

impl DataPayload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: encode_payload(bytes),
        }
    }
}
