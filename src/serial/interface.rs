use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::{PortConfig, Result, SerialError};

/// An open hardware connection to one serial adapter.
///
/// The handle is owned by a [`PortSession`](super::PortSession); the reader
/// half handed out by [`SerialConnection::reader`] is driven by the session's
/// reader pump on its own thread.
pub trait SerialConnection: Send {
    /// Apply line parameters to the live connection
    fn set_parameters(&mut self, config: &PortConfig) -> Result<()>;

    fn set_dtr(&mut self, level: bool) -> Result<()>;

    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Blocking write of the whole buffer, bounded by `timeout`
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Obtain the read half. Called once per connection.
    fn reader(&mut self) -> Result<Box<dyn ConnectionReader>>;

    /// Release the hardware handle
    fn close(self: Box<Self>) -> Result<()>;
}

/// Read half of a connection.
///
/// `read` may return `ErrorKind::TimedOut`/`WouldBlock` or `Ok(0)` when no
/// data arrived within the poll interval; any other error is fatal.
pub trait ConnectionReader: Send {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Connection backed by the `serialport` crate
pub struct SerialportConnection {
    port: Box<dyn SerialPort>,
    port_name: String,
    poll_interval: Duration,
}

impl SerialportConnection {
    /// Open `port_name` with `config`. Reads on the connection wake up every
    /// `poll_interval` so the reader pump can observe a stop request.
    pub fn open(port_name: &str, config: &PortConfig, poll_interval: Duration) -> Result<Self> {
        let port = serialport::new(port_name, config.baud_rate)
            .data_bits(config.data_bits)
            .stop_bits(config.stop_bits)
            .parity(config.parity)
            .flow_control(config.flow_control)
            .timeout(poll_interval)
            .open()
            .map_err(SerialError::from_open_error)?;

        log::info!("Opened serial port {} at {} baud", port_name, config.baud_rate);
        Ok(Self {
            port,
            port_name: port_name.to_string(),
            poll_interval,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl SerialConnection for SerialportConnection {
    fn set_parameters(&mut self, config: &PortConfig) -> Result<()> {
        let apply = |port: &mut Box<dyn SerialPort>| -> serialport::Result<()> {
            port.set_baud_rate(config.baud_rate)?;
            port.set_data_bits(config.data_bits)?;
            port.set_stop_bits(config.stop_bits)?;
            port.set_parity(config.parity)?;
            port.set_flow_control(config.flow_control)
        };
        apply(&mut self.port).map_err(|e| SerialError::Rejected(e.to_string()))
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port.write_request_to_send(level)?;
        Ok(())
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        write_bounded(&mut self.port, data, timeout, self.poll_interval)
    }

    fn reader(&mut self) -> Result<Box<dyn ConnectionReader>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SerialportReader { port }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        log::info!("Closing serial port {}", self.port_name);
        drop(self.port);
        Ok(())
    }
}

/// Handle whose single timeout governs both reads and writes. On Windows a
/// `try_clone`d reader shares it with the writer.
trait TimedPort: Write {
    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()>;
}

impl TimedPort for Box<dyn SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        (**self).set_timeout(timeout)
    }
}

/// Write the whole buffer within `timeout`, then put the read poll interval back
fn write_bounded<P: TimedPort>(port: &mut P, data: &[u8], timeout: Duration, poll_interval: Duration) -> Result<()> {
    port.set_timeout(timeout)?;
    let result = port.write_all(data).and_then(|_| port.flush());
    if let Err(e) = port.set_timeout(poll_interval) {
        log::warn!("Failed to restore read poll interval: {}", e);
    }

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(SerialError::WriteTimeout(timeout)),
        Err(e) => Err(SerialError::IoError(e)),
    }
}

struct SerialportReader {
    port: Box<dyn SerialPort>,
}

impl ConnectionReader for SerialportReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Default)]
    struct RecordingPort {
        timeouts: Vec<Duration>,
        written: Vec<u8>,
        stall: bool,
    }

    impl Write for RecordingPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stall {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "stalled"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl TimedPort for RecordingPort {
        fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
            self.timeouts.push(timeout);
            Ok(())
        }
    }

    const POLL: Duration = Duration::from_millis(50);
    const WRITE: Duration = Duration::from_millis(2000);

    #[test]
    fn test_write_restores_poll_interval() {
        let mut port = RecordingPort::default();
        write_bounded(&mut port, b"PING", WRITE, POLL).expect("write");
        assert_eq!(port.written, b"PING".to_vec());
        assert_eq!(port.timeouts, vec![WRITE, POLL]);
    }

    #[test]
    fn test_timed_out_write_still_restores_poll_interval() {
        let mut port = RecordingPort {
            stall: true,
            ..RecordingPort::default()
        };
        let err = write_bounded(&mut port, b"PING", WRITE, POLL).expect_err("stalled");
        assert!(matches!(err, SerialError::WriteTimeout(t) if t == WRITE));
        assert_eq!(port.timeouts.last(), Some(&POLL));
    }
}
