//! Background reader moving bytes from an open connection to the coordinator
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ConnectionReader, Result};

/// What the pump observed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    Data(Vec<u8>),
    /// Fatal read failure; the pump has terminated
    Error(String),
}

/// A pump event tagged with the session that produced it
#[derive(Debug, Clone)]
pub struct PumpMessage {
    pub session_id: Uuid,
    pub event: PumpEvent,
}

pub struct ReaderPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderPump {
    /// Start reading from `reader` on a dedicated thread. Every chunk is sent
    /// verbatim on `events`; the first fatal read error is sent once and the
    /// thread exits.
    pub fn spawn(
        session_id: Uuid,
        reader: Box<dyn ConnectionReader>,
        events: mpsc::UnboundedSender<PumpMessage>,
        buffer_size: usize,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name(format!("usb-serial-pump-{}", session_id.simple()))
            .spawn(move || run(session_id, reader, stop_flag, events, buffer_size))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Request the pump to stop and block until its thread has exited.
    /// A read in progress finishes within one poll interval.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Reader pump thread panicked");
            }
        }
    }
}

impl Drop for ReaderPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    session_id: Uuid,
    mut reader: Box<dyn ConnectionReader>,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PumpMessage>,
    buffer_size: usize,
) {
    log::debug!("Reader pump {} started", session_id);
    let mut buf = vec![0u8; buffer_size.max(1)];

    while !stop.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                let message = PumpMessage {
                    session_id,
                    event: PumpEvent::Data(buf[..n].to_vec()),
                };
                if events.send(message).is_err() {
                    log::debug!("Reader pump {}: coordinator gone, exiting", session_id);
                    break;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                // Errors raised while tearing down are expected and not reported
                if !stop.load(Ordering::Acquire) {
                    log::error!("Reader pump {} read failed: {}", session_id, e);
                    let _ = events.send(PumpMessage {
                        session_id,
                        event: PumpEvent::Error(e.to_string()),
                    });
                }
                break;
            }
        }
    }

    log::debug!("Reader pump {} stopped", session_id);
}
