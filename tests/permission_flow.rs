use std::sync::Arc;
use std::time::Duration;

use usb_serial_bridge_lib::device::{DeviceError, LifecycleState, PermissionState};
use usb_serial_bridge_lib::{BridgeConfig, DeviceManager, MockUsbHost};

const CH340: (u16, u16) = (0x1A86, 0x7523);
const FTDI: (u16, u16) = (0x0403, 0x6001);

fn manager(host: &Arc<MockUsbHost>) -> Arc<DeviceManager> {
    DeviceManager::new(host.clone(), BridgeConfig::default())
}

async fn wait_for_request(host: &MockUsbHost) {
    for _ in 0..200 {
        if host.pending_requests() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("host never received a permission request");
}

#[tokio::test]
async fn test_request_port_without_devices_is_not_found() {
    let host = MockUsbHost::new();
    let manager = manager(&host);

    let err = manager.request_port().await.expect_err("no device attached");
    assert!(matches!(err, DeviceError::NotFound));
    assert_eq!(err.code(), "NotFoundError");
    assert_eq!(host.permission_requests(), 0, "no prompt without a device");
}

#[tokio::test]
async fn test_already_granted_resolves_without_prompt() {
    let host = MockUsbHost::new();
    host.attach(CH340.0, CH340.1, "/dev/ttyUSB0");
    host.grant("/dev/ttyUSB0");
    let manager = manager(&host);

    let granted = manager.request_port().await.expect("granted");
    assert_eq!(granted.port_id, Some(0));
    assert_eq!(granted.vendor_id, CH340.0);
    assert_eq!(granted.product_id, CH340.1);
    assert_eq!(granted.device_name, "/dev/ttyUSB0");
    assert_eq!(host.permission_requests(), 0);
    assert_eq!(manager.status().await.permission, PermissionState::Granted);
}

#[tokio::test]
async fn test_request_port_waits_for_grant() {
    let host = MockUsbHost::new();
    host.attach(FTDI.0, FTDI.1, "/dev/ttyUSB0");
    host.attach(CH340.0, CH340.1, "/dev/ttyUSB1");
    let manager = manager(&host);

    let request = tokio::spawn({
        let manager = manager.clone();
        async move { manager.request_port().await }
    });
    wait_for_request(&host).await;
    assert_eq!(manager.state().await, LifecycleState::AwaitingPermission);

    assert_eq!(host.respond(true), 1);
    let granted = request.await.expect("join").expect("granted");
    // Only the first attached adapter is negotiated
    assert_eq!(granted.port_id, Some(0));
    assert_eq!(granted.device_name, "/dev/ttyUSB0");
    assert_eq!(manager.state().await, LifecycleState::Idle);
}

#[tokio::test]
async fn test_grant_without_device_reports_requested_adapter() {
    let host = MockUsbHost::new();
    host.attach(CH340.0, CH340.1, "COM4");
    let manager = manager(&host);

    let request = tokio::spawn({
        let manager = manager.clone();
        async move { manager.request_port().await }
    });
    wait_for_request(&host).await;
    host.respond_without_device(true);

    let granted = request.await.expect("join").expect("granted");
    assert_eq!(granted.port_id, Some(0));
    assert_eq!(granted.device_name, "COM4");
}

#[tokio::test]
async fn test_denial_clears_slot_and_allows_retry() {
    let host = MockUsbHost::new();
    host.attach(CH340.0, CH340.1, "/dev/ttyUSB0");
    let manager = manager(&host);

    let request = tokio::spawn({
        let manager = manager.clone();
        async move { manager.request_port().await }
    });
    wait_for_request(&host).await;
    host.respond(false);

    let err = request.await.expect("join").expect_err("denied");
    assert!(matches!(err, DeviceError::AccessDenied));
    assert_eq!(err.to_string(), "USB permission denied by user");
    let status = manager.status().await;
    assert_eq!(status.state, LifecycleState::Idle);
    assert_eq!(status.permission, PermissionState::Denied);

    // A fresh request reaches the host again
    let retry = tokio::spawn({
        let manager = manager.clone();
        async move { manager.request_port().await }
    });
    wait_for_request(&host).await;
    assert_eq!(host.permission_requests(), 2);
    host.respond(true);
    assert!(retry.await.expect("join").is_ok());
}

#[tokio::test]
async fn test_concurrent_request_rejected_while_pending() {
    let host = MockUsbHost::new();
    host.attach(CH340.0, CH340.1, "/dev/ttyUSB0");
    let manager = manager(&host);

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.request_port().await }
    });
    wait_for_request(&host).await;

    let err = manager.request_port().await.expect_err("second request");
    assert!(matches!(err, DeviceError::RequestInProgress));
    assert_eq!(host.permission_requests(), 1);

    host.respond(true);
    assert!(first.await.expect("join").is_ok());
}

#[tokio::test]
async fn test_shutdown_cancels_pending_request() {
    let host = MockUsbHost::new();
    host.attach(CH340.0, CH340.1, "/dev/ttyUSB0");
    let manager = manager(&host);

    let request = tokio::spawn({
        let manager = manager.clone();
        async move { manager.request_port().await }
    });
    wait_for_request(&host).await;

    manager.shutdown().await;
    let err = request.await.expect("join").expect_err("cancelled");
    assert!(matches!(err, DeviceError::Cancelled));
    assert_eq!(manager.state().await, LifecycleState::Idle);

    // The host's late answer is dropped
    host.respond(true);
    assert_eq!(manager.state().await, LifecycleState::Idle);
}
