//! Firmware images and where they come from.
//!
//! A [`FirmwareImage`] is an immutable byte buffer plus the flash offset it
//! targets. Images are produced by a [`FirmwareSource`] (local file or HTTP
//! URL) and are read-only once loaded.

pub mod header;
pub mod source;

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};

pub use header::{FlashMode, ImageChip, ImageHeader};
pub use source::FirmwareSource;

/// Largest flash found on ESP32-class parts (16 MiB).
pub const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

/// Offsets at which a bootable ESP application or bootloader image lives.
pub const BOOTABLE_OFFSETS: &[u32] = &[0x0, 0x1000, 0x10000];

/// Where the ESP32 second-stage bootloader sits inside a merged image.
const MERGED_BOOTLOADER_OFFSET: usize = 0x1000;

/// An immutable firmware image targeting one flash offset.
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Arc<[u8]>,
    offset: u32,
    origin: String,
}

impl FirmwareImage {
    /// Create an image from raw bytes.
    ///
    /// Empty images and images larger than [`MAX_IMAGE_SIZE`] are rejected,
    /// as are images that would run past the 32-bit address space.
    pub fn new(bytes: impl Into<Arc<[u8]>>, offset: u32, origin: impl Into<String>) -> Result<Self> {
        let bytes = bytes.into();
        let origin = origin.into();

        if bytes.is_empty() {
            return Err(Error::FirmwareLoad(format!("{origin} is empty")));
        }
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(Error::FirmwareLoad(format!(
                "{origin} is {} bytes, larger than the {} byte flash limit",
                bytes.len(),
                MAX_IMAGE_SIZE
            )));
        }
        if u64::from(offset) + bytes.len() as u64 > u64::from(u32::MAX) + 1 {
            return Err(Error::FirmwareLoad(format!(
                "{origin} at offset {offset:#x} overflows the address space"
            )));
        }

        debug!(
            "Loaded {} bytes from {origin} for offset {offset:#x}",
            bytes.len()
        );

        Ok(Self {
            bytes,
            offset,
            origin,
        })
    }

    /// Blank (erased-flash, `0xFF`) image used by demo mode.
    pub fn demo(size: usize, offset: u32) -> Result<Self> {
        Self::new(vec![0xFFu8; size], offset, "demo image")
    }

    /// Image contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; empty images cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Flash offset this image targets.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Where the image came from (path or URL).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Parse the ESP application image header, if present.
    pub fn header(&self) -> Option<ImageHeader> {
        ImageHeader::parse(&self.bytes).ok()
    }

    /// An image written to a boot offset should carry the ESP image magic.
    ///
    /// A merged image written at `0x0` starts with `0xFF` padding and carries
    /// the bootloader header at `0x1000`; that counts as well placed.
    pub fn looks_misplaced(&self) -> bool {
        if !BOOTABLE_OFFSETS.contains(&self.offset) || self.header().is_some() {
            return false;
        }
        !(self.offset == 0 && self.is_merged())
    }

    fn is_merged(&self) -> bool {
        self.bytes
            .get(MERGED_BOOTLOADER_OFFSET..)
            .is_some_and(|rest| ImageHeader::parse(rest).is_ok())
    }
}

impl fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("len", &self.bytes.len())
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("origin", &self.origin)
            .finish()
    }
}

/// Parse a flash offset the way the offset box accepts it.
///
/// - empty → `0x0`
/// - `0x`/`0X` prefix → hexadecimal
/// - otherwise decimal, falling back to bare hexadecimal (`1000` is decimal,
///   `e000` is hex)
///
/// Underscore separators are allowed (`0x1_0000`).
pub fn parse_offset(input: &str) -> Result<u32> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    let invalid = || Error::FirmwareLoad(format!("invalid flash offset '{trimmed}'"));

    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).map_err(|_| invalid());
    }

    cleaned
        .parse::<u32>()
        .or_else(|_| u32::from_str_radix(&cleaned, 16))
        .map_err(|_| invalid())
}
