//! Flasher abstraction.
//!
//! A [`Flasher`] implements the device's bootloader protocol. espflow never
//! speaks that protocol itself: the real implementation is
//! [`ExternalFlasher`], which drives an out-of-process esptool resolved by
//! [`FlasherProvider`]. [`DemoFlasher`] simulates the whole thing for demo
//! mode and never writes to hardware.

pub mod demo;
pub mod external;
pub mod provider;

use std::fmt;

use crate::error::Result;
use crate::event::ProgressReporter;
use crate::firmware::FirmwareImage;
use crate::port::Transport;

pub use demo::DemoFlasher;
pub use external::{ExternalFlasher, ResetMode};
pub use provider::{FlasherCandidate, FlasherProvider};

/// Target chip selection passed to the flasher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Chip {
    /// Let the flasher detect the chip.
    #[default]
    Auto,
    /// ESP32.
    Esp32,
    /// ESP32-S2.
    Esp32s2,
    /// ESP32-S3.
    Esp32s3,
    /// ESP32-C2.
    Esp32c2,
    /// ESP32-C3.
    Esp32c3,
    /// ESP32-C6.
    Esp32c6,
    /// ESP32-H2.
    Esp32h2,
    /// ESP32-P4.
    Esp32p4,
}

impl Chip {
    /// Name understood by esptool's `--chip` option.
    pub fn esptool_name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Esp32 => "esp32",
            Self::Esp32s2 => "esp32s2",
            Self::Esp32s3 => "esp32s3",
            Self::Esp32c2 => "esp32c2",
            Self::Esp32c3 => "esp32c3",
            Self::Esp32c6 => "esp32c6",
            Self::Esp32h2 => "esp32h2",
            Self::Esp32p4 => "esp32p4",
        }
    }

    /// Parse a chip name (`esp32s3`, `ESP32-S3`, `auto`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "auto" => Some(Self::Auto),
            "esp32" => Some(Self::Esp32),
            "esp32s2" => Some(Self::Esp32s2),
            "esp32s3" => Some(Self::Esp32s3),
            "esp32c2" => Some(Self::Esp32c2),
            "esp32c3" => Some(Self::Esp32c3),
            "esp32c6" => Some(Self::Esp32c6),
            "esp32h2" => Some(Self::Esp32h2),
            "esp32p4" => Some(Self::Esp32p4),
            _ => None,
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.esptool_name())
    }
}

/// Chip identification reported by a flasher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChipInfo {
    /// Chip name, e.g. "ESP32-S3 (QFN56)".
    pub chip: String,
    /// Silicon revision, e.g. "v0.2".
    pub revision: Option<String>,
    /// Feature list.
    pub features: Vec<String>,
    /// Crystal frequency, e.g. "40MHz".
    pub crystal: Option<String>,
    /// Factory MAC address.
    pub mac: Option<String>,
}

/// Bootloader protocol implementation used by a session.
///
/// All operations borrow the session's transport; a flasher never owns it.
/// Implementations report progress through the supplied
/// [`ProgressReporter`] and must not call [`ProgressReporter::finish`] or
/// [`ProgressReporter::fail`]; the session does that.
pub trait Flasher: Send {
    /// Short name for logs (e.g. "esptool 4.7.0").
    fn name(&self) -> &str;

    /// Whether this flasher only simulates hardware access.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Identify the connected chip.
    fn identify(&mut self, transport: &mut dyn Transport) -> Result<ChipInfo>;

    /// Write `image` at its offset.
    fn flash_data(
        &mut self,
        transport: &mut dyn Transport,
        image: &FirmwareImage,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()>;

    /// Erase the entire flash.
    fn erase(
        &mut self,
        transport: &mut dyn Transport,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()>;
}
