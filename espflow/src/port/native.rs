//! Native serial transport using the `serialport` crate.
//!
//! This module provides the transport implementation for native platforms
//! (Linux, macOS, Windows, FreeBSD, etc.).

use {
    crate::{
        error::{Error, Result},
        port::{SerialConfig, Transport},
    },
    log::{debug, trace},
    std::io::{Read, Write},
};

/// Native serial transport.
pub struct NativeTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    config: SerialConfig,
    closed: bool,
}

impl NativeTransport {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = Self::open_handle(config)?;

        Ok(Self {
            port: Some(port),
            config: config.clone(),
            closed: false,
        })
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig::new(port_name, baud_rate);
        Self::open(&config)
    }

    fn open_handle(config: &SerialConfig) -> Result<Box<dyn serialport::SerialPort>> {
        trace!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        Ok(port)
    }

    fn closed_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Transport for NativeTransport {
    fn name(&self) -> &str {
        &self.config.port_name
    }

    fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn suspend(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Released {} for external access", self.config.port_name);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Io(Self::closed_error()));
        }
        if self.port.is_none() {
            self.port = Some(Self::open_handle(&self.config)?);
            debug!("Reacquired {}", self.config.port_name);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the port
        self.port.take();
        self.closed = true;
        Ok(())
    }
}

impl Read for NativeTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativeTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(std::io::Write::flush)
    }
}
