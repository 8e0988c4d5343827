use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// USB vendor ids of the common USB-to-serial chipset families
pub const FTDI_VID: u16 = 0x0403;
pub const SILABS_VID: u16 = 0x10C4;
pub const WCH_VID: u16 = 0x1A86;
pub const PROLIFIC_VID: u16 = 0x067B;

/// Serial chipset driver bound to a USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    CdcAcm,
    Ftdi,
    Cp21xx,
    Ch34x,
    Prolific,
}

impl DriverKind {
    /// Pick the driver for a device from its USB ids. Devices from unknown
    /// vendors that expose a serial interface are treated as CDC-ACM.
    pub fn probe(vendor_id: u16, _product_id: u16) -> Self {
        match vendor_id {
            FTDI_VID => DriverKind::Ftdi,
            SILABS_VID => DriverKind::Cp21xx,
            WCH_VID => DriverKind::Ch34x,
            PROLIFIC_VID => DriverKind::Prolific,
            _ => DriverKind::CdcAcm,
        }
    }

    /// Driver class name reported to callers in `listPorts`
    pub fn class_name(&self) -> &'static str {
        match self {
            DriverKind::CdcAcm => "CdcAcmSerialDriver",
            DriverKind::Ftdi => "FtdiSerialDriver",
            DriverKind::Cp21xx => "Cp21xxSerialDriver",
            DriverKind::Ch34x => "Ch34xSerialDriver",
            DriverKind::Prolific => "ProlificSerialDriver",
        }
    }
}

/// Host-level identity of a USB device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// OS device node, e.g. `/dev/ttyUSB0` or `COM3`
    pub system_name: String,
    pub serial_number: Option<String>,
}

impl UsbDeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, system_name: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            system_name: system_name.into(),
            serial_number: None,
        }
    }

    /// Same physical device as `other`. The serial number is not compared
    /// because not every host reports it in every context.
    pub fn same_device(&self, other: &UsbDeviceIdentity) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.system_name == other.system_name
    }
}

/// A device as reported by the host's enumeration, before indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbSerialDevice {
    pub identity: UsbDeviceIdentity,
    pub driver: DriverKind,
}

impl UsbSerialDevice {
    pub fn new(identity: UsbDeviceIdentity) -> Self {
        let driver = DriverKind::probe(identity.vendor_id, identity.product_id);
        Self { identity, driver }
    }
}

/// One entry of a catalog snapshot. Immutable; replaced wholesale on the next enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub index: usize,
    pub vendor_id: u16,
    pub product_id: u16,
    pub system_name: String,
    pub serial_number: Option<String>,
    pub driver: DriverKind,
}

impl DeviceDescriptor {
    pub fn from_device(index: usize, device: UsbSerialDevice) -> Self {
        Self {
            index,
            vendor_id: device.identity.vendor_id,
            product_id: device.identity.product_id,
            system_name: device.identity.system_name,
            serial_number: device.identity.serial_number,
            driver: device.driver,
        }
    }

    pub fn identity(&self) -> UsbDeviceIdentity {
        UsbDeviceIdentity {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            system_name: self.system_name.clone(),
            serial_number: self.serial_number.clone(),
        }
    }
}

/// Outcome of the most recent permission negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Unknown,
    Granted,
    Denied,
}

/// Connection lifecycle as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    AwaitingPermission,
    Open,
}

/// Events pushed to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Bytes received from the device, in arrival order
    Data(Vec<u8>),
    /// The open connection failed and was closed
    Disconnected { reason: String },
}

/// Row of the `listPorts` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub port_id: usize,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    pub driver_class: String,
}

impl From<&DeviceDescriptor> for PortInfo {
    fn from(descriptor: &DeviceDescriptor) -> Self {
        Self {
            port_id: descriptor.index,
            vendor_id: descriptor.vendor_id,
            product_id: descriptor.product_id,
            device_name: descriptor.system_name.clone(),
            driver_class: descriptor.driver.class_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortList {
    pub ports: Vec<PortInfo>,
}

/// Result of `requestPort`. `port_id` is `None` when the granted device is
/// not part of the current catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedPort {
    pub port_id: Option<usize>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResult {
    pub success: bool,
    pub baud_rate: u32,
}

/// Snapshot of the coordinator for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub state: LifecycleState,
    pub permission: PermissionState,
    pub port_id: Option<usize>,
    pub device_name: Option<String>,
    pub baud_rate: Option<u32>,
    pub opened_at: Option<DateTime<Utc>>,
}
