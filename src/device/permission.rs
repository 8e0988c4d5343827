//! One-shot rendezvous between a caller waiting for USB access and the host's
//! asynchronous grant/deny answer.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::oneshot;
use uuid::Uuid;

use super::{DeviceDescriptor, DeviceError, PermissionState, Result, UsbDeviceIdentity};
use crate::host::UsbHost;

/// The host's answer to a permission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionResponse {
    pub granted: bool,
    /// Device the host granted access to, when it reports one
    pub device: Option<UsbDeviceIdentity>,
}

/// Handed to the host with each request; delivers the answer back to the
/// negotiator from whatever thread the host responds on.
#[derive(Clone)]
pub struct PermissionResponder {
    request_id: Uuid,
    negotiator: Weak<PermissionNegotiator>,
}

impl PermissionResponder {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Deliver the host's answer. Returns `false` if the request was already
    /// resolved or the negotiator is gone; such answers are dropped.
    pub fn respond(&self, response: PermissionResponse) -> bool {
        match self.negotiator.upgrade() {
            Some(negotiator) => negotiator.complete(self.request_id, response),
            None => false,
        }
    }
}

struct PendingRequest {
    id: Uuid,
    descriptor: DeviceDescriptor,
    reply: oneshot::Sender<Result<UsbDeviceIdentity>>,
}

/// Result of [`PermissionNegotiator::ensure_access`]
pub enum AccessOutcome {
    /// Access was already held; no host round-trip happened
    Granted(UsbDeviceIdentity),
    /// A request was sent to the host; await the answer
    Pending(PendingAccess),
}

pub struct PendingAccess {
    request_id: Uuid,
    reply: oneshot::Receiver<Result<UsbDeviceIdentity>>,
}

impl PendingAccess {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Wait for the host's answer. Fails with `Cancelled` if the request is
    /// dropped on shutdown.
    pub async fn wait(self) -> Result<UsbDeviceIdentity> {
        match self.reply.await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Cancelled),
        }
    }
}

/// Holds at most one outstanding permission request process-wide
pub struct PermissionNegotiator {
    pending: Mutex<Option<PendingRequest>>,
    last_state: Mutex<PermissionState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PermissionNegotiator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(None),
            last_state: Mutex::new(PermissionState::Unknown),
        })
    }

    /// Make sure this process may open `descriptor`.
    ///
    /// Resolves immediately when the host already records access. Otherwise
    /// registers the single pending request and asks the host; a second call
    /// while that request is outstanding fails with `RequestInProgress`.
    pub fn ensure_access(self: &Arc<Self>, host: &dyn UsbHost, descriptor: &DeviceDescriptor) -> Result<AccessOutcome> {
        let identity = descriptor.identity();
        if host.has_permission(&identity) {
            log::debug!("Access to {} already granted", identity.system_name);
            *lock(&self.last_state) = PermissionState::Granted;
            return Ok(AccessOutcome::Granted(identity));
        }

        let (tx, rx) = oneshot::channel();
        let request_id = Uuid::new_v4();
        {
            let mut pending = lock(&self.pending);
            if pending.is_some() {
                return Err(DeviceError::RequestInProgress);
            }
            *pending = Some(PendingRequest {
                id: request_id,
                descriptor: descriptor.clone(),
                reply: tx,
            });
            *lock(&self.last_state) = PermissionState::Unknown;
        }

        log::info!("Requesting USB permission for {} (request {})", identity.system_name, request_id);
        // The slot lock is released first: hosts may answer synchronously
        host.request_permission(
            &identity,
            PermissionResponder {
                request_id,
                negotiator: Arc::downgrade(self),
            },
        );

        Ok(AccessOutcome::Pending(PendingAccess { request_id, reply: rx }))
    }

    /// Resolve the pending request identified by `request_id`
    fn complete(&self, request_id: Uuid, response: PermissionResponse) -> bool {
        let request = {
            let mut pending = lock(&self.pending);
            let is_current = pending.as_ref().map_or(false, |r| r.id == request_id);
            if is_current {
                pending.take()
            } else {
                None
            }
        };

        let Some(request) = request else {
            log::debug!("Ignoring permission response for stale request {}", request_id);
            return false;
        };

        let outcome = if response.granted {
            *lock(&self.last_state) = PermissionState::Granted;
            let device = response.device.unwrap_or_else(|| request.descriptor.identity());
            log::info!("USB permission granted for {}", device.system_name);
            Ok(device)
        } else {
            *lock(&self.last_state) = PermissionState::Denied;
            log::info!("USB permission denied for {}", request.descriptor.system_name);
            Err(DeviceError::AccessDenied)
        };

        if request.reply.send(outcome).is_err() {
            log::debug!("Permission request {} resolved after its caller went away", request_id);
        }
        true
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    pub fn state(&self) -> PermissionState {
        *lock(&self.last_state)
    }

    /// Drop the pending request; its caller fails with `Cancelled`
    pub fn cancel(&self) -> bool {
        let dropped = lock(&self.pending).take();
        if let Some(request) = &dropped {
            log::info!("Cancelled permission request {}", request.id);
        }
        dropped.is_some()
    }
}
