//! Serial port source backed by the `serialport` crate.

use std::io::Read;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

use super::{ChunkSource, SerialError};

/// Read timeout used when none is configured.  Short enough that the run
/// loop notices a shutdown request promptly.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A hardware serial port configured 8N1 without flow control.
pub struct SerialPortSource {
    path: String,
    port: Box<dyn SerialPort>,
}

impl SerialPortSource {
    /// Opens `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::Open`] if the device cannot be opened or configured.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|source| SerialError::Open {
                port: path.to_string(),
                source,
            })?;

        info!("opened serial port {path} at {baud_rate} baud");
        Ok(Self {
            path: path.to_string(),
            port,
        })
    }
}

impl ChunkSource for SerialPortSource {
    fn name(&self) -> &str {
        &self.path
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(source) => Err(SerialError::Read {
                port: self.path.clone(),
                source,
            }),
        }
    }

    fn discard_input(&mut self) -> Result<(), SerialError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|source| SerialError::Discard {
                port: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_returns_open_error() {
        let result = SerialPortSource::open("/dev/does-not-exist-bridge", 4800, DEFAULT_READ_TIMEOUT);
        match result {
            Err(SerialError::Open { port, .. }) => assert_eq!(port, "/dev/does-not-exist-bridge"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }
}
