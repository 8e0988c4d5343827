use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DeviceDescriptor, UsbDeviceIdentity};
use crate::host::UsbHost;

#[derive(Default)]
struct CatalogSnapshot {
    devices: Vec<DeviceDescriptor>,
    enumerated_at: Option<DateTime<Utc>>,
}

/// Last enumeration of serial-capable USB devices. Port ids handed to
/// callers are positions in this snapshot.
#[derive(Default)]
pub struct DeviceCatalog {
    snapshot: RwLock<CatalogSnapshot>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the host and replace the snapshot with a fresh zero-indexed list
    pub async fn enumerate(&self, host: &dyn UsbHost) -> Vec<DeviceDescriptor> {
        let devices: Vec<DeviceDescriptor> = host
            .enumerate()
            .into_iter()
            .enumerate()
            .map(|(index, device)| DeviceDescriptor::from_device(index, device))
            .collect();

        let mut snapshot = self.snapshot.write().await;
        snapshot.devices = devices.clone();
        snapshot.enumerated_at = Some(Utc::now());
        log::debug!("Catalog refreshed: {} device(s)", devices.len());
        devices
    }

    pub async fn devices(&self) -> Vec<DeviceDescriptor> {
        self.snapshot.read().await.devices.clone()
    }

    pub async fn get(&self, index: usize) -> Option<DeviceDescriptor> {
        self.snapshot.read().await.devices.get(index).cloned()
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot.read().await.devices.is_empty()
    }

    /// Position of `identity` in the current snapshot
    pub async fn index_of(&self, identity: &UsbDeviceIdentity) -> Option<usize> {
        self.snapshot
            .read()
            .await
            .devices
            .iter()
            .find(|d| d.identity().same_device(identity))
            .map(|d| d.index)
    }

    pub async fn enumerated_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().await.enumerated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockUsbHost;

    #[tokio::test]
    async fn test_enumerate_indexes_from_zero_and_replaces_snapshot() {
        let host = MockUsbHost::new();
        host.attach(0x0403, 0x6001, "/dev/ttyUSB0");
        host.attach(0x10C4, 0xEA60, "/dev/ttyUSB1");

        let catalog = DeviceCatalog::new();
        assert!(catalog.enumerated_at().await.is_none());

        let devices = catalog.enumerate(host.as_ref()).await;
        assert_eq!(devices.len(), 2);
        for (position, device) in devices.iter().enumerate() {
            assert_eq!(device.index, position);
        }
        assert_eq!(catalog.index_of(&UsbDeviceIdentity::new(0x10C4, 0xEA60, "/dev/ttyUSB1")).await, Some(1));

        host.detach("/dev/ttyUSB0");
        let devices = catalog.enumerate(host.as_ref()).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].system_name, "/dev/ttyUSB1");
        assert_eq!(devices[0].index, 0);
        assert_eq!(catalog.len().await, 1);
        assert!(catalog.enumerated_at().await.is_some());
    }

    #[tokio::test]
    async fn test_empty_enumeration_is_not_an_error() {
        let host = MockUsbHost::new();
        let catalog = DeviceCatalog::new();
        assert!(catalog.enumerate(host.as_ref()).await.is_empty());
        assert!(catalog.is_empty().await);
        assert!(catalog.get(0).await.is_none());
    }
}
