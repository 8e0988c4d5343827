//! Host USB subsystem seen by the bridge: enumeration, access rights and device handles.
#[doc(hidden)]
pub mod mock;
pub mod system;

#[doc(hidden)]
pub use mock::{MockPort, MockUsbHost};
pub use system::SystemUsbHost;

pub use crate::device::PermissionResponder;
use crate::device::{UsbDeviceIdentity, UsbSerialDevice};
use crate::serial::{self, PortConfig, SerialConnection};

/// Capability set the bridge needs from the host operating system
pub trait UsbHost: Send + Sync {
    /// All attached USB devices that have a serial driver bound
    fn enumerate(&self) -> Vec<UsbSerialDevice>;

    /// Whether this process already holds access rights to `device`
    fn has_permission(&self, device: &UsbDeviceIdentity) -> bool;

    /// Ask the host for access to `device`. The answer is delivered later,
    /// possibly on another thread, through `responder`.
    fn request_permission(&self, device: &UsbDeviceIdentity, responder: PermissionResponder);

    /// Obtain a hardware handle to `device`, opened with `config`
    fn open_device(
        &self,
        device: &UsbDeviceIdentity,
        config: &PortConfig,
    ) -> serial::Result<Box<dyn SerialConnection>>;
}
