//! The cellular/GPS modem, spoken to with AT commands over a serial port.

mod response;

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

pub use response::{GpsResponse, acknowledged, parse_gps_info, parse_signal_quality};

pub const START_GPS: &str = "AT+CGPS=1,1";
pub const QUERY_GPS: &str = "AT+CGPSINFO";
pub const STOP_GPS: &str = "AT+CGPS=0";
pub const SIGNAL_QUALITY: &str = "AT+CSQ";

/// How long to wait for a response to a plain command.
pub const RESPONSE_WAIT: Duration = Duration::from_secs(1);

/// Per-read timeout once the response has had time to arrive.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors talking to the modem.
#[derive(Debug, thiserror::Error)]
pub enum ModemError {
    #[error("modem unavailable: {0}")]
    Unavailable(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{command} not acknowledged: {response:?}")]
    NotAcknowledged { command: String, response: String },

    #[error("unexpected response to {command}: {response:?}")]
    Malformed { command: String, response: String },
}

pub type Result<T> = core::result::Result<T, ModemError>;

/// A line-oriented command channel to the modem.
pub trait AtChannel {
    /// Send `command`, wait, and return everything the modem answered.
    fn exchange(&mut self, command: &str, wait: Duration) -> Result<String>;

    /// Send `command` and require an `OK`.
    fn command(&mut self, command: &str, wait: Duration) -> Result<String> {
        let response = self.exchange(command, wait)?;
        if !acknowledged(&response) {
            return Err(ModemError::NotAcknowledged {
                command: command.to_string(),
                response,
            });
        }
        Ok(response)
    }
}

/// Query the cellular signal strength (RSSI, 0-31, 99 = unknown).
pub fn signal_quality(channel: &mut dyn AtChannel) -> Result<u8> {
    let response = channel.command(SIGNAL_QUALITY, RESPONSE_WAIT)?;
    parse_signal_quality(&response).ok_or_else(|| ModemError::Malformed {
        command: SIGNAL_QUALITY.to_string(),
        response,
    })
}

/// A modem on a serial port.
pub struct SerialModem<P = Box<dyn serialport::SerialPort>> {
    port: P,
}

impl SerialModem {
    /// Open the modem's serial device and drop anything already buffered.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud).timeout(READ_TIMEOUT).open()?;
        port.clear(serialport::ClearBuffer::Input)?;
        tracing::debug!(path, baud, "modem opened");
        Ok(Self::from_port(port))
    }
}

impl<P: Read + Write> SerialModem<P> {
    /// Wrap an already-open port.
    pub fn from_port(port: P) -> Self {
        Self { port }
    }

    fn read_available(&mut self) -> Result<String> {
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(String::from_utf8_lossy(&received).into_owned())
    }
}

impl<P: Read + Write> AtChannel for SerialModem<P> {
    fn exchange(&mut self, command: &str, wait: Duration) -> Result<String> {
        self.port.write_all(format!("{command}\r\n").as_bytes())?;
        self.port.flush()?;
        thread::sleep(wait);

        let response = self.read_available()?;
        tracing::trace!(command, response = %response.trim(), "AT exchange");
        Ok(response)
    }
}
