//! Port abstraction for the camera's serial link.
//!
//! The protocol layer never touches a concrete serial port. It talks to the
//! [`Port`] trait, which adds the few operations the camera protocol needs on
//! top of `Read + Write`: a non-blocking "bytes available" query and get/set
//! of the read timeout.
//!
//! ```text
//! +------------------------------+
//! |  HydroCam / transfer engine  |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |          Port trait          |
//! +-------+--------------+-------+
//!         |              |
//!         v              v
//! +-------+------+ +-----+--------+
//! |  NativePort  | |   FakePort   |
//! | (serialport) | |  (scripted)  |
//! +--------------+ +--------------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use hydrocam::port::{FakePort, Port};
//! use std::io::Read;
//!
//! let mut port = FakePort::with_input(b"OK\r\n");
//! assert_eq!(port.bytes_available().unwrap(), 4);
//!
//! let mut buf = [0u8; 4];
//! port.read_exact(&mut buf).unwrap();
//! assert_eq!(&buf, b"OK\r\n");
//! ```

pub mod fake;
#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Fixed line speed of the HydroCAM RS-232 interface.
pub const CAMERA_BAUD: u32 = 115_200;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout used when no shorter window is requested.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: CAMERA_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name at the camera's baud rate.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte transport used by the camera driver.
///
/// Reads follow `std::io::Read` semantics, except that an
/// `ErrorKind::TimedOut` or `ErrorKind::WouldBlock` error means "no byte
/// arrived within the read timeout" and is never treated as fatal.
pub trait Port: Read + Write + Send {
    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Discard everything buffered in both directions.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

pub use fake::FakePort;
#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .with_baud_rate(57_600)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_boxed_port_delegates() {
        let mut port: Box<dyn Port> = Box::new(FakePort::with_input(b"abc"));
        assert_eq!(port.bytes_available().unwrap(), 3);
        port.set_timeout(Duration::from_millis(7)).unwrap();
        assert_eq!(port.timeout(), Duration::from_millis(7));
        port.clear_buffers().unwrap();
        assert_eq!(port.bytes_available().unwrap(), 0);
    }
}
