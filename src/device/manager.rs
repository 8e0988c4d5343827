use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{
    AccessOutcome, BridgeEvent, BridgeStatus, DeviceCatalog, DeviceDescriptor, DeviceError, GrantedPort,
    LifecycleState, OpenResult, PermissionNegotiator, PortInfo, PortList, Result,
};
use crate::config::BridgeConfig;
use crate::host::UsbHost;
use crate::transport::decode_payload;
use crate::serial::{PortSession, PumpEvent, PumpMessage};

/// Central lifecycle coordinator.
///
/// Sequences discovery, permission negotiation, port open and close, and
/// turns reader pump failures into a `disconnected` event plus cleanup.
/// At most one port is open and at most one permission request is pending.
pub struct DeviceManager {
    host: Arc<dyn UsbHost>,
    config: BridgeConfig,
    catalog: DeviceCatalog,
    negotiator: Arc<PermissionNegotiator>,
    session: Mutex<Option<PortSession>>,
    // Session whose pump output is currently delivered
    active_session: StdMutex<Option<Uuid>>,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<BridgeEvent>>>,
    pump_tx: mpsc::UnboundedSender<PumpMessage>,
}

impl DeviceManager {
    /// Create the coordinator and start its pump event task.
    /// Must be called from within a Tokio runtime.
    pub fn new(host: Arc<dyn UsbHost>, config: BridgeConfig) -> Arc<Self> {
        let (pump_tx, pump_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(Self {
            host,
            config,
            catalog: DeviceCatalog::new(),
            negotiator: PermissionNegotiator::new(),
            session: Mutex::new(None),
            active_session: StdMutex::new(None),
            subscribers: StdMutex::new(Vec::new()),
            pump_tx,
        });

        tokio::spawn(Self::pump_event_loop(Arc::downgrade(&manager), pump_rx));
        manager
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Receive `data` and `disconnected` events.
    ///
    /// Each subscriber gets its own unbounded queue: a slow reader delays its
    /// own events but never loses any. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        rx
    }

    /// Re-enumerate attached adapters; `portId` of each entry is its position
    pub async fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.catalog.enumerate(self.host.as_ref()).await
    }

    pub async fn list_ports(&self) -> PortList {
        let ports = self.enumerate().await.iter().map(PortInfo::from).collect();
        PortList { ports }
    }

    /// Obtain access to the first attached adapter.
    ///
    /// Only catalog entry 0 is negotiated; with several adapters attached,
    /// callers pick another one by `portId` from `list_ports`. Suspends until
    /// the host answers when access is not already held.
    pub async fn request_port(&self) -> Result<GrantedPort> {
        let devices = self.enumerate().await;
        let target = match devices.into_iter().next() {
            Some(target) => target,
            None => {
                log::warn!("requestPort: no USB serial device attached");
                return Err(DeviceError::NotFound);
            }
        };

        let device = match self.negotiator.ensure_access(self.host.as_ref(), &target)? {
            AccessOutcome::Granted(device) => device,
            AccessOutcome::Pending(pending) => pending.wait().await?,
        };

        Ok(GrantedPort {
            port_id: self.catalog.index_of(&device).await,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            device_name: device.system_name,
        })
    }

    /// Open the adapter at `port_id` (default 0) at `baud_rate` (default from config)
    pub async fn open(&self, port_id: Option<usize>, baud_rate: Option<u32>) -> Result<OpenResult> {
        let port_id = port_id.unwrap_or(0);
        let config = self.config.port_config(baud_rate);
        if config.baud_rate == 0 {
            return Err(DeviceError::InvalidArgument("baudRate must be greater than zero".to_string()));
        }

        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(DeviceError::AlreadyOpen);
        }

        if self.catalog.is_empty().await {
            self.catalog.enumerate(self.host.as_ref()).await;
        }
        let descriptor = match self.catalog.get(port_id).await {
            Some(descriptor) => descriptor,
            None => {
                let available = self.catalog.len().await;
                return Err(DeviceError::InvalidArgument(format!(
                    "Invalid portId {} ({} port(s) available)",
                    port_id, available
                )));
            }
        };

        log::info!("Opening {} (port {}) at {} baud", descriptor.system_name, port_id, config.baud_rate);
        let connection = self.host.open_device(&descriptor.identity(), &config)?;

        let session_id = Uuid::new_v4();
        self.set_active_session(Some(session_id));
        let started = PortSession::start(
            session_id,
            connection,
            port_id,
            &descriptor.system_name,
            config,
            self.pump_tx.clone(),
            self.config.read_buffer_size,
        );
        let session = match started {
            Ok(session) => session,
            Err(e) => {
                self.set_active_session(None);
                log::error!("Failed to open {}: {}", descriptor.system_name, e);
                return Err(e.into());
            }
        };

        let baud_rate = session.baud_rate();
        *slot = Some(session);
        Ok(OpenResult {
            success: true,
            baud_rate,
        })
    }

    /// Write with the configured timeout
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.write_with_timeout(data, self.config.write_timeout()).await
    }

    pub async fn write_with_timeout(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(DeviceError::NotOpen)?;
        session.write(data, timeout)?;
        Ok(())
    }

    /// Write a base64 payload from the caller channel. The port must be open
    /// before the payload is looked at.
    pub async fn write_payload(&self, payload: &str) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(DeviceError::NotOpen)?;
        let bytes = decode_payload(payload)?;
        session.write(&bytes, self.config.write_timeout())?;
        Ok(())
    }

    /// Change the baud rate of the open port without interrupting reads
    pub async fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(DeviceError::NotOpen)?;
        if baud_rate == 0 {
            return Err(DeviceError::InvalidArgument("baudRate must be greater than zero".to_string()));
        }
        session.reconfigure(baud_rate)?;
        Ok(())
    }

    /// Close the open port, if any. Idempotent.
    pub async fn close(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            self.set_active_session(None);
            Self::release(session).await;
        }
    }

    /// Teardown: drop the pending permission request and close the port
    pub async fn shutdown(&self) {
        self.negotiator.cancel();
        self.close().await;
        log::info!("Device manager shut down");
    }

    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn state(&self) -> LifecycleState {
        self.status().await.state
    }

    pub async fn status(&self) -> BridgeStatus {
        let slot = self.session.lock().await;
        let state = if slot.is_some() {
            LifecycleState::Open
        } else if self.negotiator.is_pending() {
            LifecycleState::AwaitingPermission
        } else {
            LifecycleState::Idle
        };

        BridgeStatus {
            state,
            permission: self.negotiator.state(),
            port_id: slot.as_ref().map(|s| s.port_id()),
            device_name: slot.as_ref().map(|s| s.device_name().to_string()),
            baud_rate: slot.as_ref().map(|s| s.baud_rate()),
            opened_at: slot.as_ref().map(|s| s.opened_at()),
        }
    }

    fn set_active_session(&self, session_id: Option<Uuid>) {
        *self.active_session.lock().unwrap_or_else(PoisonError::into_inner) = session_id;
    }

    fn is_active_session(&self, session_id: Uuid) -> bool {
        *self.active_session.lock().unwrap_or_else(PoisonError::into_inner) == Some(session_id)
    }

    fn publish(&self, event: BridgeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Stop the pump and release the handle off the async executor
    async fn release(session: PortSession) {
        let name = session.device_name().to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || session.close()).await {
            log::error!("Closing {} panicked: {}", name, e);
        }
    }

    async fn pump_event_loop(manager: Weak<Self>, mut pump_rx: mpsc::UnboundedReceiver<PumpMessage>) {
        while let Some(message) = pump_rx.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            match message.event {
                PumpEvent::Data(bytes) => {
                    if manager.is_active_session(message.session_id) {
                        manager.publish(BridgeEvent::Data(bytes));
                    }
                }
                PumpEvent::Error(reason) => manager.handle_pump_failure(message.session_id, reason).await,
            }
        }
        log::debug!("Pump event loop finished");
    }

    /// A pump of the current session hit a read error: close the session and
    /// notify subscribers. Failures of sessions already closed are ignored.
    async fn handle_pump_failure(&self, session_id: Uuid, reason: String) {
        let mut slot = self.session.lock().await;
        let is_current = slot.as_ref().map_or(false, |s| s.id() == session_id);
        let session = if is_current { slot.take() } else { None };

        let Some(session) = session else {
            log::debug!("Ignoring read failure from closed session {}: {}", session_id, reason);
            return;
        };

        log::warn!("Port {} disconnected: {}", session.device_name(), reason);
        self.set_active_session(None);
        Self::release(session).await;
        drop(slot);

        self.publish(BridgeEvent::Disconnected { reason });
    }
}
