//! Simulated flasher for demo mode.
//!
//! Walks through the same phases as a real flash with fixed chunking and an
//! optional per-chunk delay. It never reads from or writes to the transport.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::event::{Phase, ProgressReporter, Severity};
use crate::firmware::FirmwareImage;
use crate::flasher::{ChipInfo, Flasher};
use crate::port::Transport;

/// Default simulated chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Flasher that fabricates progress without touching hardware.
#[derive(Debug, Clone)]
pub struct DemoFlasher {
    chunk_size: usize,
    chunk_delay: Duration,
    fail_at: Option<usize>,
}

impl Default for DemoFlasher {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::ZERO,
            fail_at: None,
        }
    }
}

impl DemoFlasher {
    /// Create a demo flasher with 4 KiB chunks and no delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the simulated chunk size (minimum 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep this long after every chunk.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Fail once at least `bytes` have been "written".
    #[must_use]
    pub fn with_failure_at(mut self, bytes: usize) -> Self {
        self.fail_at = Some(bytes);
        self
    }
}

impl Flasher for DemoFlasher {
    fn name(&self) -> &str {
        "demo"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn identify(&mut self, _transport: &mut dyn Transport) -> Result<ChipInfo> {
        Ok(ChipInfo {
            chip: "ESP32 (demo)".to_string(),
            revision: Some("v3.1".to_string()),
            features: vec!["WiFi".to_string(), "BT".to_string(), "Dual Core".to_string()],
            crystal: Some("40MHz".to_string()),
            mac: Some("00:00:00:00:00:00".to_string()),
        })
    }

    fn flash_data(
        &mut self,
        _transport: &mut dyn Transport,
        image: &FirmwareImage,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        debug!(
            "Simulating write of {} bytes at {:#x}",
            image.len(),
            image.offset()
        );
        progress.phase_changed(Phase::Handshaking);
        progress.phase_changed(Phase::Writing);

        let total = image.len();
        let mut written = 0usize;
        while written < total {
            written = (written + self.chunk_size).min(total);
            if let Some(fail_at) = self.fail_at {
                if written >= fail_at {
                    return Err(Error::FlasherProtocol(format!(
                        "simulated failure after {written} bytes"
                    )));
                }
            }
            if !self.chunk_delay.is_zero() {
                thread::sleep(self.chunk_delay);
            }
            progress.advance_to(written);
        }

        progress.phase_changed(Phase::Verifying);
        progress.log(Severity::Info, "Hash of data verified (simulated)");
        Ok(())
    }

    fn erase(
        &mut self,
        _transport: &mut dyn Transport,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        progress.phase_changed(Phase::Handshaking);
        progress.phase_changed(Phase::Erasing);
        if self.fail_at.is_some() {
            return Err(Error::FlasherProtocol("simulated erase failure".to_string()));
        }
        if !self.chunk_delay.is_zero() {
            thread::sleep(self.chunk_delay * 10);
        }
        Ok(())
    }
}
