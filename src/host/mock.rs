//! In-memory host used by tests and demos.
//!
//! `MockUsbHost` keeps a scripted device list and permission table; every
//! device it opens is backed by a [`MockPort`] whose handle lets the caller
//! feed inbound bytes, inject read failures and inspect what was written.
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::UsbHost;
use crate::device::{PermissionResponder, PermissionResponse, UsbDeviceIdentity, UsbSerialDevice};
use crate::serial::{self, ConnectionReader, PortConfig, SerialConnection, SerialError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct HostState {
    devices: Vec<UsbSerialDevice>,
    granted: HashSet<String>,
    refused: HashMap<String, String>,
    rejected_baud_rates: HashSet<u32>,
    pending: Vec<(UsbDeviceIdentity, PermissionResponder)>,
    permission_requests: usize,
    open_count: usize,
    ports: HashMap<String, MockPort>,
}

pub struct MockUsbHost {
    state: Mutex<HostState>,
    poll_interval: Duration,
}

impl MockUsbHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HostState::default()),
            poll_interval: Duration::from_millis(10),
        })
    }

    /// Plug in a device
    pub fn attach(&self, vendor_id: u16, product_id: u16, system_name: &str) {
        let device = UsbSerialDevice::new(UsbDeviceIdentity::new(vendor_id, product_id, system_name));
        lock(&self.state).devices.push(device);
    }

    /// Unplug a device. An open port on it keeps its handle until closed.
    pub fn detach(&self, system_name: &str) {
        lock(&self.state)
            .devices
            .retain(|d| d.identity.system_name != system_name);
    }

    /// Record access as already granted for `system_name`
    pub fn grant(&self, system_name: &str) {
        lock(&self.state).granted.insert(system_name.to_string());
    }

    pub fn revoke(&self, system_name: &str) {
        lock(&self.state).granted.remove(system_name);
    }

    /// Make `open_device` fail for `system_name` as if the host refused access
    pub fn refuse_open(&self, system_name: &str, reason: &str) {
        lock(&self.state)
            .refused
            .insert(system_name.to_string(), reason.to_string());
    }

    /// Make every port reject `baud_rate` when parameters are applied
    pub fn reject_baud_rate(&self, baud_rate: u32) {
        let mut state = lock(&self.state);
        state.rejected_baud_rates.insert(baud_rate);
        for port in state.ports.values() {
            lock(&port.state).rejected_baud_rates.insert(baud_rate);
        }
    }

    /// Number of permission requests the host has received
    pub fn permission_requests(&self) -> usize {
        lock(&self.state).permission_requests
    }

    /// Number of unanswered permission requests
    pub fn pending_requests(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Answer every outstanding permission request, reporting the device
    /// identity back the way a host broadcast does
    pub fn respond(&self, granted: bool) -> usize {
        self.answer(granted, true)
    }

    /// Answer without a device identity in the response
    pub fn respond_without_device(&self, granted: bool) -> usize {
        self.answer(granted, false)
    }

    fn answer(&self, granted: bool, with_device: bool) -> usize {
        let pending = {
            let mut state = lock(&self.state);
            let pending: Vec<_> = state.pending.drain(..).collect();
            if granted {
                for (device, _) in &pending {
                    state.granted.insert(device.system_name.clone());
                }
            }
            pending
        };

        let count = pending.len();
        for (device, responder) in pending {
            responder.respond(PermissionResponse {
                granted,
                device: with_device.then_some(device),
            });
        }
        count
    }

    /// Number of handles handed out by `open_device`
    pub fn open_count(&self) -> usize {
        lock(&self.state).open_count
    }

    /// Handle to the most recent port opened on `system_name`
    pub fn port(&self, system_name: &str) -> Option<MockPort> {
        lock(&self.state).ports.get(system_name).cloned()
    }
}

impl UsbHost for MockUsbHost {
    fn enumerate(&self) -> Vec<UsbSerialDevice> {
        lock(&self.state).devices.clone()
    }

    fn has_permission(&self, device: &UsbDeviceIdentity) -> bool {
        lock(&self.state).granted.contains(&device.system_name)
    }

    fn request_permission(&self, device: &UsbDeviceIdentity, responder: PermissionResponder) {
        let mut state = lock(&self.state);
        state.permission_requests += 1;
        state.pending.push((device.clone(), responder));
    }

    fn open_device(
        &self,
        device: &UsbDeviceIdentity,
        config: &PortConfig,
    ) -> serial::Result<Box<dyn SerialConnection>> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.refused.get(&device.system_name) {
            return Err(SerialError::PermissionDenied(reason.clone()));
        }
        if !state
            .devices
            .iter()
            .any(|d| d.identity.same_device(device))
        {
            return Err(SerialError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not attached", device.system_name),
            )));
        }

        let (port, connection) = MockPort::open(config, &state.rejected_baud_rates, self.poll_interval);
        state.open_count += 1;
        state.ports.insert(device.system_name.clone(), port);
        Ok(Box::new(connection))
    }
}

enum Inbound {
    Data(Vec<u8>),
    Fail(String),
}

enum WriteFailure {
    Timeout,
    Io(String),
}

#[derive(Default)]
struct PortState {
    written: Vec<u8>,
    baud_rate: u32,
    parameter_changes: usize,
    dtr: bool,
    rts: bool,
    closed: bool,
    write_failure: Option<WriteFailure>,
    rejected_baud_rates: HashSet<u32>,
}

/// Test-side handle to a port opened by [`MockUsbHost`]
#[derive(Clone)]
pub struct MockPort {
    state: Arc<Mutex<PortState>>,
    inbound: mpsc::Sender<Inbound>,
}

impl MockPort {
    fn open(config: &PortConfig, rejected: &HashSet<u32>, poll_interval: Duration) -> (Self, MockConnection) {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(Mutex::new(PortState {
            baud_rate: config.baud_rate,
            rejected_baud_rates: rejected.clone(),
            ..PortState::default()
        }));

        let port = MockPort {
            state: state.clone(),
            inbound: tx,
        };
        let connection = MockConnection {
            state,
            inbound: Some(rx),
            poll_interval,
        };
        (port, connection)
    }

    /// Bytes arriving from the device
    pub fn feed(&self, data: &[u8]) {
        let _ = self.inbound.send(Inbound::Data(data.to_vec()));
    }

    /// Make the next read fail, as an unplugged cable would
    pub fn fail_reads(&self, reason: &str) {
        let _ = self.inbound.send(Inbound::Fail(reason.to_string()));
    }

    pub fn fail_writes(&self, reason: &str) {
        lock(&self.state).write_failure = Some(WriteFailure::Io(reason.to_string()));
    }

    /// Make writes exceed their timeout
    pub fn stall_writes(&self) {
        lock(&self.state).write_failure = Some(WriteFailure::Timeout);
    }

    /// Everything written to the device so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn baud_rate(&self) -> u32 {
        lock(&self.state).baud_rate
    }

    /// How many times line parameters were applied
    pub fn parameter_changes(&self) -> usize {
        lock(&self.state).parameter_changes
    }

    pub fn dtr(&self) -> bool {
        lock(&self.state).dtr
    }

    pub fn rts(&self) -> bool {
        lock(&self.state).rts
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

struct MockConnection {
    state: Arc<Mutex<PortState>>,
    inbound: Option<mpsc::Receiver<Inbound>>,
    poll_interval: Duration,
}

impl SerialConnection for MockConnection {
    fn set_parameters(&mut self, config: &PortConfig) -> serial::Result<()> {
        let mut state = lock(&self.state);
        if state.rejected_baud_rates.contains(&config.baud_rate) {
            return Err(SerialError::Rejected(format!("unsupported baud rate {}", config.baud_rate)));
        }
        state.baud_rate = config.baud_rate;
        state.parameter_changes += 1;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> serial::Result<()> {
        lock(&self.state).dtr = level;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> serial::Result<()> {
        lock(&self.state).rts = level;
        Ok(())
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> serial::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(SerialError::IoError(io::Error::new(io::ErrorKind::NotConnected, "port closed")));
        }
        match &state.write_failure {
            Some(WriteFailure::Timeout) => return Err(SerialError::WriteTimeout(timeout)),
            Some(WriteFailure::Io(reason)) => {
                return Err(SerialError::IoError(io::Error::new(io::ErrorKind::BrokenPipe, reason.clone())))
            }
            None => {}
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn reader(&mut self) -> serial::Result<Box<dyn ConnectionReader>> {
        let inbound = self.inbound.take().ok_or_else(|| {
            SerialError::IoError(io::Error::new(io::ErrorKind::Other, "reader already taken"))
        })?;
        Ok(Box::new(MockReader {
            inbound,
            leftover: Vec::new(),
            poll_interval: self.poll_interval,
        }))
    }

    fn close(self: Box<Self>) -> serial::Result<()> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.dtr = false;
        state.rts = false;
        Ok(())
    }
}

struct MockReader {
    inbound: mpsc::Receiver<Inbound>,
    leftover: Vec<u8>,
    poll_interval: Duration,
}

impl MockReader {
    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        n
    }
}

impl ConnectionReader for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.leftover.is_empty() {
            return Ok(self.drain_into(buf));
        }
        match self.inbound.recv_timeout(self.poll_interval) {
            Ok(Inbound::Data(data)) => {
                self.leftover = data;
                Ok(self.drain_into(buf))
            }
            Ok(Inbound::Fail(reason)) => Err(io::Error::new(io::ErrorKind::BrokenPipe, reason)),
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(self.poll_interval);
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }
}
