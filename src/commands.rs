use std::sync::Arc;

use tauri::State;

use crate::device::{BridgeStatus, DeviceError, DeviceManager, GrantedPort, OpenResult, PortList};

/// Render an error for the frontend as `<code>: <message>`. Hardware errors
/// get the operation prefixed so the caller can tell which step failed.
fn command_error(operation: &str, e: DeviceError) -> String {
    match e {
        DeviceError::SerialError(_) => format!("{}: {}: {}", e.code(), operation, e),
        _ => format!("{}: {}", e.code(), e),
    }
}

/// Enumerate attached USB serial adapters
#[tauri::command]
pub async fn list_ports(
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<PortList, String> {
    Ok(device_manager.list_ports().await)
}

/// Obtain access to the first attached adapter, prompting the host if needed
#[tauri::command]
pub async fn request_port(
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<GrantedPort, String> {
    device_manager
        .request_port()
        .await
        .map_err(|e| command_error("Failed to request port", e))
}

/// Open a port by id
#[tauri::command]
pub async fn open(
    port_id: Option<usize>,
    baud_rate: Option<u32>,
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<OpenResult, String> {
    device_manager
        .open(port_id, baud_rate)
        .await
        .map_err(|e| command_error("Failed to open port", e))
}

/// Write a base64 payload to the open port
#[tauri::command]
pub async fn write(
    data: Option<String>,
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<(), String> {
    device_manager
        .write_payload(data.as_deref().unwrap_or_default())
        .await
        .map_err(|e| command_error("Write failed", e))
}

/// Close the open port. Always succeeds.
#[tauri::command]
pub async fn close(
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<(), String> {
    device_manager.close().await;
    Ok(())
}

/// Change the baud rate of the open port
#[tauri::command]
pub async fn set_baud_rate(
    baud_rate: Option<u32>,
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<(), String> {
    let baud_rate = baud_rate.unwrap_or(device_manager.config().default_baud_rate);
    device_manager
        .set_baud_rate(baud_rate)
        .await
        .map_err(|e| command_error("Failed to set baud rate", e))
}

/// Current lifecycle state and open port details
#[tauri::command]
pub async fn status(
    device_manager: State<'_, Arc<DeviceManager>>,
) -> Result<BridgeStatus, String> {
    Ok(device_manager.status().await)
}
