//! Byte transport between host and cube.

use std::io;

#[cfg(feature = "serial")]
use super::LinkError;

/// A bidirectional byte pipe to the device.
///
/// Writes block until the bytes are handed to the driver. Reads never block:
/// callers poll [`Transport::bytes_available`] and drain what has arrived.
pub trait Transport: Send {
    /// Write all bytes.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Number of inbound bytes ready to read.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read every inbound byte currently buffered.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Read one inbound byte if any is buffered.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Discard stale inbound bytes.
    fn clear_input(&mut self) -> io::Result<()> {
        self.read_available().map(|_| ())
    }

    /// Release the underlying device. Further calls may fail.
    fn close(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        (**self).read_available()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        (**self).read_byte()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Serial port transport, 8 data bits, 1 stop bit, no parity.
#[cfg(feature = "serial")]
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Open `port` at `baud_rate`.
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, LinkError> {
        use serialport::{DataBits, FlowControl, Parity, StopBits};

        let handle = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(std::time::Duration::from_millis(100))
            .open()
            .map_err(|e| LinkError::Open {
                port: port.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            port: Some(handle),
            name: port.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        use std::io::Write;

        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let available = self.bytes_available()?;
        let mut bytes = vec![0u8; available];
        if available > 0 {
            std::io::Read::read_exact(&mut **self.port()?, &mut bytes)?;
        }
        Ok(bytes)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.bytes_available()? == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        std::io::Read::read_exact(&mut **self.port()?, &mut byte)?;
        Ok(Some(byte[0]))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port()?.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the handle closes the port.
        self.port = None;
    }
}

/// Names of the serial ports present on this system.
#[cfg(feature = "serial")]
pub fn available_ports() -> Result<Vec<String>, LinkError> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
