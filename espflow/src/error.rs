//! Error types for espflow.

use std::io;
use thiserror::Error;

/// Result type for espflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for espflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The user dismissed the device picker, or no device was offered.
    #[error("No device selected")]
    DeviceNotSelected,

    /// The selected port could not be opened at the requested baud rate.
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port name/path.
        port: String,
        /// Reason reported by the host.
        reason: String,
    },

    /// The operation is not allowed in the current session state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Session state at the time of the call.
        state: crate::session::SessionState,
    },

    /// Another flash/erase operation is already in flight on this session.
    #[error("Session is busy with another operation")]
    SessionBusy,

    /// Error forwarded from the external flasher.
    #[error("Flasher error: {0}")]
    FlasherProtocol(String),

    /// Firmware image could not be loaded.
    #[error("Failed to load firmware: {0}")]
    FirmwareLoad(String),

    /// No flasher implementation could be resolved.
    #[error("Flasher unavailable: {0}")]
    Unavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means no usable device was reached.
    pub fn is_device_error(&self) -> bool {
        match self {
            Self::DeviceNotSelected | Self::OpenFailed { .. } | Self::Unavailable(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
