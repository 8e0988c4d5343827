use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{PortConfig, PumpMessage, ReaderPump, Result, SerialConnection};

/// An open connection plus the reader pump bound to it
pub struct PortSession {
    id: Uuid,
    port_id: usize,
    device_name: String,
    config: PortConfig,
    opened_at: DateTime<Utc>,
    pump: ReaderPump,
    connection: Option<Box<dyn SerialConnection>>,
}

impl PortSession {
    /// Configure `connection`, raise DTR/RTS and start its reader pump. Pump
    /// messages are tagged with `id`.
    ///
    /// On any failure the connection is closed before the error is returned.
    pub fn start(
        id: Uuid,
        mut connection: Box<dyn SerialConnection>,
        port_id: usize,
        device_name: &str,
        config: PortConfig,
        events: mpsc::UnboundedSender<PumpMessage>,
        read_buffer_size: usize,
    ) -> Result<Self> {
        let prepared = Self::prepare(&mut *connection, &config)
            .and_then(|_| connection.reader())
            .and_then(|reader| ReaderPump::spawn(id, reader, events, read_buffer_size));

        let pump = match prepared {
            Ok(pump) => pump,
            Err(e) => {
                if let Err(close_err) = connection.close() {
                    log::warn!("Failed to release {} after open error: {}", device_name, close_err);
                }
                return Err(e);
            }
        };

        log::info!(
            "Port session {} started on {} (port {}) at {} baud",
            id,
            device_name,
            port_id,
            config.baud_rate
        );

        Ok(Self {
            id,
            port_id,
            device_name: device_name.to_string(),
            config,
            opened_at: Utc::now(),
            pump,
            connection: Some(connection),
        })
    }

    fn prepare(connection: &mut dyn SerialConnection, config: &PortConfig) -> Result<()> {
        connection.set_parameters(config)?;
        // USB-serial adapters commonly hold off transmitting until both lines are asserted
        connection.set_dtr(true)?;
        connection.set_rts(true)?;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn port_id(&self) -> usize {
        self.port_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_pump_running(&self) -> bool {
        self.pump.is_running()
    }

    pub fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        match self.connection.as_mut() {
            Some(connection) => connection.write(data, timeout),
            None => Err(super::SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection already released",
            ))),
        }
    }

    /// Apply a new baud rate to the live connection. The reader pump keeps running.
    pub fn reconfigure(&mut self, baud_rate: u32) -> Result<()> {
        let config = self.config.with_baud_rate(baud_rate);
        if let Some(connection) = self.connection.as_mut() {
            connection.set_parameters(&config)?;
        }
        self.config = config;
        log::info!("Port session {} reconfigured to {} baud", self.id, baud_rate);
        Ok(())
    }

    /// Stop the reader pump, wait for it to exit, then release the handle.
    /// Release errors are logged and swallowed.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.pump.stop();
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                log::warn!("Error releasing {}: {}", self.device_name, e);
            }
            log::info!("Port session {} on {} closed", self.id, self.device_name);
        }
    }
}

impl Drop for PortSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
