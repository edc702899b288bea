//! Device host: port selection and opening.
//!
//! A [`DeviceHost`] is the capability a [`Session`](crate::session::Session)
//! uses to obtain a transport. Selecting a port may involve the user (an
//! interactive [`PortPicker`]), so it is kept separate from opening it.

use log::debug;

use crate::device::{self, DetectedPort};
use crate::error::{Error, Result};
use crate::port::{NullTransport, Transport};

/// Chooses one port out of the discovered ones.
pub trait PortPicker: Send + Sync {
    /// Pick a port. Returns [`Error::DeviceNotSelected`] when the user
    /// dismisses the choice or nothing suitable is offered.
    fn pick(&self, ports: &[DetectedPort]) -> Result<DetectedPort>;
}

/// Always picks the named port, whether or not discovery saw it.
#[derive(Debug, Clone)]
pub struct FixedPortPicker {
    name: String,
}

impl FixedPortPicker {
    /// Picker for the port at `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PortPicker for FixedPortPicker {
    fn pick(&self, ports: &[DetectedPort]) -> Result<DetectedPort> {
        Ok(ports
            .iter()
            .find(|p| p.name == self.name)
            .cloned()
            .unwrap_or_else(|| DetectedPort::named(self.name.clone())))
    }
}

/// Picks the most likely ESP32 port without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPortPicker;

impl PortPicker for AutoPortPicker {
    fn pick(&self, ports: &[DetectedPort]) -> Result<DetectedPort> {
        device::best_candidate(ports)
            .cloned()
            .ok_or(Error::DeviceNotSelected)
    }
}

/// Source of transports for a session.
pub trait DeviceHost: Send + Sync {
    /// Ask for a port. May prompt the user.
    fn request_port(&self) -> Result<DetectedPort>;

    /// Open `port` at `baud_rate`. Fails with [`Error::OpenFailed`].
    fn open(&self, port: &DetectedPort, baud_rate: u32) -> Result<Box<dyn Transport>>;

    /// Whether transports from this host are simulated.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Host backed by real serial ports.
#[cfg(feature = "native")]
pub struct NativeHost {
    picker: Box<dyn PortPicker>,
    timeout: std::time::Duration,
}

#[cfg(feature = "native")]
impl NativeHost {
    /// Host that discovers ports and lets `picker` choose.
    pub fn new(picker: impl PortPicker + 'static) -> Self {
        Self {
            picker: Box::new(picker),
            timeout: crate::port::SerialConfig::default().timeout,
        }
    }

    /// Set the read/write timeout of opened ports.
    #[must_use]
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(feature = "native")]
impl DeviceHost for NativeHost {
    fn request_port(&self) -> Result<DetectedPort> {
        let ports = device::detect_ports();
        debug!("Discovered {} serial port(s)", ports.len());
        self.picker.pick(&ports)
    }

    fn open(&self, port: &DetectedPort, baud_rate: u32) -> Result<Box<dyn Transport>> {
        let config =
            crate::port::SerialConfig::new(port.name.clone(), baud_rate).with_timeout(self.timeout);
        crate::port::NativeTransport::open(&config)
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .map_err(|e| Error::OpenFailed {
                port: port.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Host that hands out [`NullTransport`]s; used by demo mode.
#[derive(Debug, Clone)]
pub struct DemoHost {
    port_name: String,
}

impl Default for DemoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoHost {
    /// Name reported for the simulated port.
    pub const PORT_NAME: &'static str = "demo";

    /// Demo host with the default port name.
    pub fn new() -> Self {
        Self {
            port_name: Self::PORT_NAME.to_string(),
        }
    }
}

impl DeviceHost for DemoHost {
    fn request_port(&self) -> Result<DetectedPort> {
        Ok(DetectedPort::named(self.port_name.clone()))
    }

    fn open(&self, port: &DetectedPort, baud_rate: u32) -> Result<Box<dyn Transport>> {
        debug!("Opening simulated port {} at {baud_rate}", port.name);
        Ok(Box::new(NullTransport::new(port.name.clone(), baud_rate)))
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
