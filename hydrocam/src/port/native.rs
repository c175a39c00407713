//! `Port` over the `serialport` crate for desktop hosts.

use crate::error::Result;
use crate::port::{Port, SerialConfig};
use log::trace;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// A HydroCAM serial link on a native OS port.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open `config.port_name` at 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let link = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;
        trace!("Opened {} at {} baud", config.port_name, config.baud_rate);

        Ok(Self {
            port: Some(link),
            name: config.port_name.clone(),
            timeout: config.timeout,
        })
    }

    /// Open at the camera's default baud rate and read timeout.
    pub fn open_simple(port_name: &str) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name))
    }

    /// Release the device. Every later I/O call fails with `NotConnected`.
    pub fn close(&mut self) {
        self.port = None;
    }

    fn link(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, format!("{} is closed", self.name)))
    }
}

impl Port for NativePort {
    fn bytes_available(&mut self) -> Result<usize> {
        let pending = self.link()?.bytes_to_read()?;
        Ok(pending as usize)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(link) = self.port.as_mut() {
            trace!("Read timeout {timeout:?}");
            link.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(link) = self.port.as_mut() {
            link.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.link()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.link()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.link()?.flush()
    }
}
