use std::time::Duration;

use serialport::SerialPortType;

use super::UsbHost;
use crate::device::{PermissionResponder, PermissionResponse, UsbDeviceIdentity, UsbSerialDevice};
use crate::serial::{self, PortConfig, SerialConnection, SerialportConnection};

/// Desktop host backed by the `serialport` crate.
///
/// Desktop systems have no interactive USB permission prompt: access is
/// granted when the device node can be opened by this process, and a
/// permission request is answered by re-checking that on a background thread.
pub struct SystemUsbHost {
    read_poll_interval: Duration,
}

impl SystemUsbHost {
    pub fn new(read_poll_interval: Duration) -> Self {
        Self { read_poll_interval }
    }

    /// Discover attached USB serial adapters, sorted by device node
    pub fn discover_devices() -> Vec<UsbSerialDevice> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                log::warn!("Serial port enumeration failed: {}", e);
                return Vec::new();
            }
        };

        let mut devices: Vec<UsbSerialDevice> = ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                SerialPortType::UsbPort(usb_info) => {
                    let mut identity = UsbDeviceIdentity::new(usb_info.vid, usb_info.pid, port.port_name);
                    identity.serial_number = usb_info.serial_number;
                    Some(UsbSerialDevice::new(identity))
                }
                _ => None,
            })
            .collect();

        devices.sort_by(|a, b| a.identity.system_name.cmp(&b.identity.system_name));
        log::debug!("Discovered {} USB serial device(s)", devices.len());
        devices
    }
}

impl Default for SystemUsbHost {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::bridge::DEFAULT_READ_POLL_INTERVAL_MS))
    }
}

impl UsbHost for SystemUsbHost {
    fn enumerate(&self) -> Vec<UsbSerialDevice> {
        Self::discover_devices()
    }

    fn has_permission(&self, device: &UsbDeviceIdentity) -> bool {
        node_accessible(&device.system_name)
    }

    fn request_permission(&self, device: &UsbDeviceIdentity, responder: PermissionResponder) {
        log::info!("No interactive permission prompt on this host; re-checking access to {}", device.system_name);
        let device = device.clone();
        let spawned = std::thread::Builder::new()
            .name("usb-permission".to_string())
            .spawn({
                let responder = responder.clone();
                move || {
                    let granted = node_accessible(&device.system_name);
                    responder.respond(PermissionResponse {
                        granted,
                        device: Some(device),
                    });
                }
            });

        if let Err(e) = spawned {
            log::error!("Failed to start permission check: {}", e);
            responder.respond(PermissionResponse {
                granted: false,
                device: None,
            });
        }
    }

    fn open_device(
        &self,
        device: &UsbDeviceIdentity,
        config: &PortConfig,
    ) -> serial::Result<Box<dyn SerialConnection>> {
        let connection = SerialportConnection::open(&device.system_name, config, self.read_poll_interval)?;
        Ok(Box::new(connection))
    }
}

/// Unix device nodes carry per-group permissions (`dialout`, `uucp`).
/// Checked with `access(2)` so the node is never opened: opening a tty
/// toggles DTR on close and can block waiting for carrier.
#[cfg(unix)]
fn node_accessible(system_name: &str) -> bool {
    use nix::unistd::{access, AccessFlags};

    match access(system_name, AccessFlags::R_OK | AccessFlags::W_OK) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("No access to {}: {}", system_name, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn node_accessible(_system_name: &str) -> bool {
    true
}
