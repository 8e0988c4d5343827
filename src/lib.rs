pub mod config;
pub mod device;
pub mod host;
pub mod serial;
pub mod transport;

#[cfg(feature = "tauri")]
pub mod commands;

pub use config::BridgeConfig;
pub use device::{BridgeEvent, DeviceError, DeviceManager, LifecycleState};
pub use host::{SystemUsbHost, UsbHost};
#[doc(hidden)]
pub use host::MockUsbHost;

/// Event carrying bytes received from the device (`{ data: base64 }`)
pub const DATA_EVENT: &str = "usb-serial://data";
/// Event emitted when the open port fails (`{ reason }`)
pub const DISCONNECTED_EVENT: &str = "usb-serial://disconnected";

#[cfg(feature = "tauri")]
use std::sync::Arc;
#[cfg(feature = "tauri")]
use tauri::{plugin::TauriPlugin, AppHandle, Manager, Runtime};

/// Build the `usb-serial` plugin with default settings
#[cfg(feature = "tauri")]
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    init_with_config(BridgeConfig::default())
}

#[cfg(feature = "tauri")]
pub fn init_with_config<R: Runtime>(config: BridgeConfig) -> TauriPlugin<R> {
    tauri::plugin::Builder::new("usb-serial")
        .invoke_handler(tauri::generate_handler![
            commands::list_ports,
            commands::request_port,
            commands::open,
            commands::write,
            commands::close,
            commands::set_baud_rate,
            commands::status,
        ])
        .setup(move |app, _api| {
            config.validate()?;
            let host = Arc::new(SystemUsbHost::new(config.read_poll_interval()));
            let device_manager = tauri::async_runtime::block_on(async move { DeviceManager::new(host, config) });
            app.manage(device_manager.clone());

            // Forward bridge events to the webview
            tauri::async_runtime::spawn(forward_events(app.clone(), device_manager));

            log::info!("usb-serial plugin loaded");
            Ok(())
        })
        .on_event(|app, event| {
            if let tauri::RunEvent::Exit = event {
                if let Some(device_manager) = app.try_state::<Arc<DeviceManager>>() {
                    tauri::async_runtime::block_on(device_manager.shutdown());
                }
            }
        })
        .build()
}

#[cfg(feature = "tauri")]
async fn forward_events<R: Runtime>(app: AppHandle<R>, device_manager: Arc<DeviceManager>) {
    use tauri::Emitter;
    use transport::{DataPayload, DisconnectedPayload};

    let mut events = device_manager.subscribe();
    drop(device_manager);

    while let Some(event) = events.recv().await {
        let emitted = match event {
            BridgeEvent::Data(bytes) => app.emit(DATA_EVENT, DataPayload::from_bytes(&bytes)),
            BridgeEvent::Disconnected { reason } => app.emit(DISCONNECTED_EVENT, DisconnectedPayload { reason }),
        };
        if let Err(e) = emitted {
            log::warn!("Failed to emit serial event: {}", e);
        }
    }
}
