//! # espflow
//!
//! A library for flashing ESP32-class microcontrollers over USB serial.
//!
//! espflow does not speak the ROM bootloader protocol itself. It owns the
//! parts around it:
//!
//! - a [`Session`] state machine that serialises connect/flash/erase and
//!   rejects illegal orderings
//! - progress and log plumbing through [`EventSink`]s
//! - firmware loading from files or HTTP URLs
//! - serial port discovery and selection
//! - resolution of an external `esptool` via [`FlasherProvider`]
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use espflow::{AutoPortPicker, FirmwareSource, FlasherProvider, LogSink, NativeHost, Session};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let flasher = FlasherProvider::new().resolve()?;
//!     let session = Session::new(NativeHost::new(AutoPortPicker), flasher, Arc::new(LogSink));
//!
//!     session.connect(460_800)?;
//!     let image = session.load_firmware(&FirmwareSource::from_arg("app.bin"), 0x10000)?;
//!     session.flash(&image)?;
//!     session.disconnect()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod event;
pub mod firmware;
pub mod flasher;
pub mod host;
pub mod port;
pub mod session;

#[cfg(feature = "native")]
pub use {host::NativeHost, port::NativeTransport};
pub use {
    device::{DetectedPort, DeviceKind, auto_detect_port, detect_esp_ports, detect_ports},
    error::{Error, Result},
    event::{
        ChannelSink, EventSink, FanoutSink, LifecycleEvent, LogSink, MemorySink, Phase,
        ProgressEvent, ProgressReporter, Severity,
    },
    firmware::{FirmwareImage, FirmwareSource, ImageHeader, MAX_IMAGE_SIZE, parse_offset},
    flasher::{
        Chip, ChipInfo, DemoFlasher, ExternalFlasher, Flasher, FlasherCandidate, FlasherProvider,
        ResetMode,
    },
    host::{AutoPortPicker, DemoHost, DeviceHost, FixedPortPicker, PortPicker},
    port::{NullTransport, SerialConfig, Transport},
    session::{FlashOutcome, Session, SessionState},
};
