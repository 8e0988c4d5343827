use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use usb_serial_bridge_lib::device::{DeviceError, LifecycleState};
use usb_serial_bridge_lib::host::MockPort;
use usb_serial_bridge_lib::{BridgeConfig, BridgeEvent, DeviceManager, MockUsbHost};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn open_port() -> (Arc<MockUsbHost>, Arc<DeviceManager>, MockPort) {
    let host = MockUsbHost::new();
    host.attach(0x1A86, 0x7523, "/dev/ttyUSB0");
    let manager = DeviceManager::new(host.clone(), BridgeConfig::default());
    manager.open(None, Some(115_200)).await.expect("open");
    let port = host.port("/dev/ttyUSB0").expect("port");
    (host, manager, port)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> BridgeEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("event within timeout")
        .expect("subscription open")
}

/// Collect data events until `len` bytes have arrived
async fn collect_bytes(events: &mut mpsc::UnboundedReceiver<BridgeEvent>, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        match next_event(events).await {
            BridgeEvent::Data(bytes) => received.extend(bytes),
            other => panic!("unexpected event {:?}", other),
        }
    }
    received
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_data_events_preserve_order() {
    let (_host, manager, port) = open_port().await;
    let mut events = manager.subscribe();

    port.feed(b"AB");
    port.feed(b"C");
    port.feed(&[0x00, 0xFF, 0x10]);

    let received = collect_bytes(&mut events, 6).await;
    assert_eq!(received, vec![b'A', b'B', b'C', 0x00, 0xFF, 0x10]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_reaches_device() {
    let (_host, manager, port) = open_port().await;

    manager.write(b"PING\r\n").await.expect("write");
    manager.write(&[]).await.expect("empty write");
    manager.write(&[0x7E, 0x01]).await.expect("write");
    assert_eq!(port.written(), b"PING\r\n\x7E\x01".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_timeout_and_failure_keep_port_open() {
    let (_host, manager, port) = open_port().await;

    port.stall_writes();
    let err = manager.write(b"x").await.expect_err("timeout");
    assert_eq!(err.code(), "IOError");
    assert!(matches!(err, DeviceError::SerialError(_)));

    port.fail_writes("cable fault");
    let err = manager.write(b"x").await.expect_err("io");
    assert!(err.to_string().contains("cable fault"));
    assert!(manager.is_open().await, "write failures do not close the port");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_failure_disconnects_once() {
    let (_host, manager, port) = open_port().await;
    let mut events = manager.subscribe();

    port.feed(b"last");
    port.fail_reads("device unplugged");

    assert_eq!(collect_bytes(&mut events, 4).await, b"last".to_vec());
    match next_event(&mut events).await {
        BridgeEvent::Disconnected { reason } => assert!(reason.contains("device unplugged")),
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(manager.state().await, LifecycleState::Idle);
    assert!(port.is_closed());
    let err = manager.write(b"x").await.expect_err("closed");
    assert!(matches!(err, DeviceError::NotOpen));

    // Exactly one disconnect
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_emits_no_disconnect() {
    let (_host, manager, _port) = open_port().await;
    let mut events = manager.subscribe();

    manager.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_set_baud_rate_keeps_data_flowing() {
    let (_host, manager, port) = open_port().await;
    let mut events = manager.subscribe();

    port.feed(b"before");
    assert_eq!(collect_bytes(&mut events, 6).await, b"before".to_vec());

    manager.set_baud_rate(9_600).await.expect("reconfigure");
    assert_eq!(port.baud_rate(), 9_600);
    assert_eq!(manager.status().await.baud_rate, Some(9_600));

    port.feed(b"after");
    assert_eq!(collect_bytes(&mut events, 5).await, b"after".to_vec());
    assert_eq!(manager.state().await, LifecycleState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_baud_rate_keeps_session() {
    let (host, manager, port) = open_port().await;
    host.reject_baud_rate(250_000);

    let err = manager.set_baud_rate(250_000).await.expect_err("rejected");
    assert_eq!(err.code(), "IOError");
    assert_eq!(port.baud_rate(), 115_200);
    assert!(manager.is_open().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reopen_after_disconnect_ignores_old_session() {
    let (host, manager, port) = open_port().await;
    let mut events = manager.subscribe();

    port.fail_reads("unplugged");
    assert!(matches!(next_event(&mut events).await, BridgeEvent::Disconnected { .. }));

    manager.open(None, None).await.expect("reopen");
    let fresh = host.port("/dev/ttyUSB0").expect("new port");
    fresh.feed(b"new");
    assert_eq!(collect_bytes(&mut events, 3).await, b"new".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_subscriber_receives_every_byte() {
    let (_host, manager, port) = open_port().await;
    let mut events = manager.subscribe();

    let mut fed = Vec::new();
    for i in 0..300u32 {
        let chunk = i.to_be_bytes();
        port.feed(&chunk);
        fed.extend_from_slice(&chunk);
    }

    // Nothing is read until the pump has long delivered everything
    tokio::time::sleep(Duration::from_millis(300)).await;
    let received = collect_bytes(&mut events, fed.len()).await;
    assert_eq!(received, fed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_subscriber_does_not_affect_others() {
    let (_host, manager, port) = open_port().await;
    let dropped = manager.subscribe();
    let mut events = manager.subscribe();
    drop(dropped);

    port.feed(b"still here");
    assert_eq!(collect_bytes(&mut events, 10).await, b"still here".to_vec());

    port.fail_reads("unplugged");
    assert!(matches!(next_event(&mut events).await, BridgeEvent::Disconnected { .. }));
}
