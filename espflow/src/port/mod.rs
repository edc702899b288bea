//! Transport abstraction for serial connections.
//!
//! A [`Transport`] is one opened serial connection owned by a
//! [`Session`](crate::session::Session). Implementations:
//!
//! - **Native** (`native` feature): [`NativeTransport`] on top of the
//!   `serialport` crate.
//! - **Null**: [`NullTransport`], an in-memory stand-in used by demo mode and
//!   tests. It never touches hardware.
//!
//! ```text
//! +------------------+      +------------------+
//! |     Session      | ---> |     Flasher      |
//! +--------+---------+      +--------+---------+
//!          | owns                    | borrows (&mut)
//!          v                         v
//! +--------+-------------------------+---------+
//! |              Transport trait               |
//! +--------+-------------------------+---------+
//!          |                         |
//!          v                         v
//! +------------------+      +------------------+
//! | NativeTransport  |      |  NullTransport   |
//! |   (serialport)   |      |   (demo/tests)   |
//! +------------------+      +------------------+
//! ```
//!
//! Out-of-process flashers need the OS handle released while they run;
//! [`Transport::suspend`] and [`Transport::resume`] do that without the
//! transport ever leaving its session.

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One opened serial connection.
pub trait Transport: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the baud rate the transport was opened with.
    fn baud_rate(&self) -> u32;

    /// Whether the OS handle is currently held.
    fn is_open(&self) -> bool;

    /// Release the OS handle temporarily, keeping name and settings.
    ///
    /// Used while an out-of-process flasher needs exclusive access to the
    /// device node. Suspending an already suspended transport is a no-op.
    fn suspend(&mut self) -> Result<()>;

    /// Reacquire the OS handle released by [`Transport::suspend`].
    fn resume(&mut self) -> Result<()>;

    /// Close the transport and release resources.
    ///
    /// After calling this method, the transport cannot be resumed.
    fn close(&mut self) -> Result<()>;
}

/// In-memory transport that never touches hardware.
///
/// Writes are counted and discarded; reads time out.
#[derive(Debug)]
pub struct NullTransport {
    name: String,
    baud_rate: u32,
    open: bool,
    closed: bool,
    bytes_written: usize,
}

impl NullTransport {
    /// Create an open null transport.
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            open: true,
            closed: false,
            bytes_written: 0,
        }
    }

    /// Total number of bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    fn not_connected() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Transport for NullTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn suspend(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.closed {
            return Err(Self::not_connected().into());
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.closed = true;
        Ok(())
    }
}

impl Read for NullTransport {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.open {
            return Err(Self::not_connected());
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "null transport has no data",
        ))
    }
}

impl Write for NullTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.open {
            return Err(Self::not_connected());
        }
        self.bytes_written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativeTransport;
