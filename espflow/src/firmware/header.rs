//! ESP application image header.
//!
//! Bootloader and application images produced by ESP-IDF and `espflash`
//! start with a 24-byte header. Only the header is inspected here; segment
//! contents and the appended checksum/SHA-256 are the flasher's business.
//!
//! ```text
//! +0   magic (0xE9)
//! +1   segment count
//! +2   SPI flash mode
//! +3   flash size (high nibble) | flash frequency (low nibble)
//! +4   entry point (u32 LE)
//! +8   WP pin
//! +9   SPI pin drive settings [3]
//! +12  chip id (u16 LE)
//! +14  min chip revision (legacy)
//! +15  min chip revision, full (u16 LE, major * 100 + minor)
//! +17  max chip revision, full (u16 LE)
//! +19  reserved [4]
//! +23  hash appended (0/1)
//! ```

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

/// ESP image magic byte.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// SPI flash access mode recorded in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlashMode {
    /// Quad I/O.
    Qio,
    /// Quad output.
    Qout,
    /// Dual I/O.
    Dio,
    /// Dual output.
    Dout,
    /// Fast read.
    FastRead,
    /// Slow read.
    SlowRead,
    /// Unrecognised value.
    Unknown(u8),
}

impl From<u8> for FlashMode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Qio,
            1 => Self::Qout,
            2 => Self::Dio,
            3 => Self::Dout,
            4 => Self::FastRead,
            5 => Self::SlowRead,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qio => write!(f, "QIO"),
            Self::Qout => write!(f, "QOUT"),
            Self::Dio => write!(f, "DIO"),
            Self::Dout => write!(f, "DOUT"),
            Self::FastRead => write!(f, "FAST_READ"),
            Self::SlowRead => write!(f, "SLOW_READ"),
            Self::Unknown(v) => write!(f, "unknown ({v})"),
        }
    }
}

/// Chip an image was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageChip {
    /// ESP32.
    Esp32,
    /// ESP32-S2.
    Esp32s2,
    /// ESP32-C3.
    Esp32c3,
    /// ESP32-S3.
    Esp32s3,
    /// ESP32-C2.
    Esp32c2,
    /// ESP32-C6.
    Esp32c6,
    /// ESP32-H2.
    Esp32h2,
    /// ESP32-P4.
    Esp32p4,
    /// ESP32-C5.
    Esp32c5,
    /// Chip id not recognised.
    Unknown(u16),
}

impl From<u16> for ImageChip {
    fn from(id: u16) -> Self {
        match id {
            0 => Self::Esp32,
            2 => Self::Esp32s2,
            5 => Self::Esp32c3,
            9 => Self::Esp32s3,
            12 => Self::Esp32c2,
            13 => Self::Esp32c6,
            16 => Self::Esp32h2,
            18 => Self::Esp32p4,
            23 => Self::Esp32c5,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ImageChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Esp32 => write!(f, "ESP32"),
            Self::Esp32s2 => write!(f, "ESP32-S2"),
            Self::Esp32c3 => write!(f, "ESP32-C3"),
            Self::Esp32s3 => write!(f, "ESP32-S3"),
            Self::Esp32c2 => write!(f, "ESP32-C2"),
            Self::Esp32c6 => write!(f, "ESP32-C6"),
            Self::Esp32h2 => write!(f, "ESP32-H2"),
            Self::Esp32p4 => write!(f, "ESP32-P4"),
            Self::Esp32c5 => write!(f, "ESP32-C5"),
            Self::Unknown(id) => write!(f, "unknown chip id {id}"),
        }
    }
}

/// Parsed ESP application image header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageHeader {
    /// Number of memory segments.
    pub segment_count: u8,
    /// SPI flash mode.
    pub flash_mode: FlashMode,
    /// Raw flash size nibble.
    pub flash_size_code: u8,
    /// Raw flash frequency nibble.
    pub flash_freq_code: u8,
    /// Entry point address.
    pub entry_point: u32,
    /// Target chip.
    pub chip: ImageChip,
    /// Minimum chip revision (major * 100 + minor).
    pub min_revision: u16,
    /// Maximum chip revision (major * 100 + minor).
    pub max_revision: u16,
    /// Whether a SHA-256 digest is appended after the checksum.
    pub hash_appended: bool,
}

impl ImageHeader {
    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::FirmwareLoad(format!(
                "image too short for an ESP header: {} bytes",
                data.len()
            )));
        }

        let mut reader = Cursor::new(&data[..HEADER_SIZE]);
        let magic = reader.read_u8()?;
        if magic != IMAGE_MAGIC {
            return Err(Error::FirmwareLoad(format!(
                "not an ESP image (magic {magic:#04x}, expected {IMAGE_MAGIC:#04x})"
            )));
        }

        let segment_count = reader.read_u8()?;
        let flash_mode = FlashMode::from(reader.read_u8()?);
        let size_freq = reader.read_u8()?;
        let entry_point = reader.read_u32::<LittleEndian>()?;

        // WP pin + SPI pin drive settings
        let mut skip = [0u8; 4];
        reader.read_exact(&mut skip)?;

        let chip = ImageChip::from(reader.read_u16::<LittleEndian>()?);
        let _legacy_min_rev = reader.read_u8()?;
        let min_revision = reader.read_u16::<LittleEndian>()?;
        let max_revision = reader.read_u16::<LittleEndian>()?;

        let mut reserved = [0u8; 4];
        reader.read_exact(&mut reserved)?;
        let hash_appended = reader.read_u8()? == 1;

        Ok(Self {
            segment_count,
            flash_mode,
            flash_size_code: size_freq >> 4,
            flash_freq_code: size_freq & 0x0F,
            entry_point,
            chip,
            min_revision,
            max_revision,
            hash_appended,
        })
    }

    /// Flash size in bytes, if the nibble is a known size.
    pub fn flash_size(&self) -> Option<u32> {
        match self.flash_size_code {
            code @ 0..=7 => Some((1024 * 1024) << code),
            _ => None,
        }
    }

    /// Flash size as a human-readable string.
    pub fn flash_size_label(&self) -> String {
        self.flash_size()
            .map_or_else(|| "unknown".to_string(), |size| format!("{}MB", size / (1024 * 1024)))
    }

    /// Format a full revision number as `vMAJOR.MINOR`.
    pub fn format_revision(revision: u16) -> String {
        format!("v{}.{}", revision / 100, revision % 100)
    }
}
