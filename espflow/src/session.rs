//! The flashing session state machine.
//!
//! ```text
//!            connect            ok              flash/erase/identify
//!   idle ─────────────▶ connecting ───▶ connected ───────────────▶ flashing
//!    ▲  ◀── cancel/fail ──┘               ▲  │                      │  │
//!    │                                    │  │ disconnect    ok     │  │ fail
//!    └────────────────────────────────────┼──┘◀─────────────────────┘  ▼
//!                                         └──────── connect ──────── error
//! ```
//!
//! A [`Session`] exclusively owns one transport and one flasher. Every
//! method takes `&self`, so a session can be shared between threads; a call
//! that would overlap an operation already in flight is rejected, never
//! queued. Each failure is returned *and* reported to the event sink as
//! exactly one error-severity log line.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};
use crate::event::{EventSink, LifecycleEvent, ProgressReporter, Severity};
use crate::firmware::{FirmwareImage, FirmwareSource};
use crate::flasher::{ChipInfo, Flasher};
use crate::host::DeviceHost;
use crate::port::Transport;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SessionState {
    /// No transport.
    #[default]
    Idle,
    /// A `connect` call is selecting or opening a port.
    Connecting,
    /// Transport open and ready.
    Connected,
    /// A flash, erase or identify operation is running.
    Flashing,
    /// The last operation failed; the transport has been closed.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Flashing => "flashing",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Summary of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashOutcome {
    /// Bytes written.
    pub bytes_written: usize,
    /// Flash offset written to.
    pub offset: u32,
    /// Wall-clock duration of the operation.
    pub elapsed: Duration,
    /// Whether nothing actually reached hardware.
    pub simulated: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    baud_rate: u32,
    last_error: Option<String>,
    port_name: Option<String>,
    generation: u64,
}

struct Io {
    transport: Option<Box<dyn Transport>>,
    flasher: Box<dyn Flasher>,
}

/// One flashing session over one device.
pub struct Session {
    host: Box<dyn DeviceHost>,
    sink: Arc<dyn EventSink>,
    simulated: bool,
    inner: Mutex<Inner>,
    io: Mutex<Io>,
}

impl Session {
    /// Create an idle session.
    pub fn new(
        host: impl DeviceHost + 'static,
        flasher: impl Flasher + 'static,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::from_boxed(Box::new(host), Box::new(flasher), sink)
    }

    /// Create an idle session from already boxed parts.
    pub fn from_boxed(
        host: Box<dyn DeviceHost>,
        flasher: Box<dyn Flasher>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let simulated = host.is_simulated() || flasher.is_simulated();
        Self {
            host,
            sink,
            simulated,
            inner: Mutex::new(Inner::default()),
            io: Mutex::new(Io {
                transport: None,
                flasher,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// Message of the failure that moved the session to `error`.
    pub fn last_error(&self) -> Option<String> {
        self.inner().last_error.clone()
    }

    /// Baud rate of the current (or last) connection; 0 before any.
    pub fn baud_rate(&self) -> u32 {
        self.inner().baud_rate
    }

    /// Port of the current (or last) connection.
    pub fn port_name(&self) -> Option<String> {
        self.inner().port_name.clone()
    }

    /// Number of successful connects so far.
    pub fn generation(&self) -> u64 {
        self.inner().generation
    }

    /// Whether this session runs in demo mode.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Select a port and open it at `baud_rate`.
    ///
    /// Valid from `idle` and `error`. On failure the session is left in the
    /// state it had before the call.
    pub fn connect(&self, baud_rate: u32) -> Result<()> {
        let previous = {
            let mut inner = self.inner();
            let current = inner.state;
            match current {
                SessionState::Idle | SessionState::Error => {},
                SessionState::Flashing => return Err(self.report(Error::SessionBusy)),
                state @ (SessionState::Connecting | SessionState::Connected) => {
                    return Err(self.report(Error::InvalidState {
                        operation: "connect",
                        state,
                    }));
                },
            }
            if baud_rate == 0 {
                return Err(self.report(Error::OpenFailed {
                    port: inner.port_name.clone().unwrap_or_default(),
                    reason: "baud rate must be greater than zero".to_string(),
                }));
            }
            inner.state = SessionState::Connecting;
            current
        };

        if self.simulated {
            self.log(Severity::Warning, "Demo mode: nothing will be written to hardware");
        }

        let opened = self
            .host
            .request_port()
            .and_then(|port| self.host.open(&port, baud_rate).map(|t| (port, t)));

        let (port, transport) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.inner().state = previous;
                return Err(self.report(e));
            },
        };

        if let Some(mut stale) = self.io().transport.replace(transport) {
            if let Err(e) = stale.close() {
                debug!("Error while closing stale transport: {e}");
            }
        }

        {
            let mut inner = self.inner();
            inner.state = SessionState::Connected;
            inner.baud_rate = baud_rate;
            inner.port_name = Some(port.name.clone());
            inner.last_error = None;
            inner.generation += 1;
            debug!("Session generation {} on {}", inner.generation, port.name);
        }

        self.log(
            Severity::Success,
            format!("Connected to {} at {baud_rate} baud", port.name),
        );
        Ok(())
    }

    /// Write `image` at its offset.
    pub fn flash(&self, image: &FirmwareImage) -> Result<FlashOutcome> {
        self.begin("flash")?;

        if image.looks_misplaced() {
            self.log(
                Severity::Warning,
                format!(
                    "{} has no ESP image header but targets boot offset {:#x}",
                    image.origin(),
                    image.offset()
                ),
            );
        }
        self.log(
            Severity::Info,
            format!(
                "Writing {} bytes from {} at {:#x}",
                image.len(),
                image.origin(),
                image.offset()
            ),
        );

        let started = Instant::now();
        self.run(image.len(), |flasher, transport, progress| {
            flasher.flash_data(transport, image, progress)
        })?;

        let outcome = FlashOutcome {
            bytes_written: image.len(),
            offset: image.offset(),
            elapsed: started.elapsed(),
            simulated: self.simulated,
        };
        self.log(
            Severity::Success,
            format!(
                "Flashed {} bytes in {:.1}s",
                outcome.bytes_written,
                outcome.elapsed.as_secs_f64()
            ),
        );
        Ok(outcome)
    }

    /// Erase the whole flash.
    pub fn erase(&self) -> Result<()> {
        self.begin("erase")?;
        self.log(Severity::Info, "Erasing flash");
        self.run(0, |flasher, transport, progress| flasher.erase(transport, progress))?;
        self.log(Severity::Success, "Flash erased");
        Ok(())
    }

    /// Ask the flasher to identify the connected chip.
    pub fn identify(&self) -> Result<ChipInfo> {
        self.begin("identify")?;
        let info = self.run(0, |flasher, transport, _| flasher.identify(transport))?;
        self.log(Severity::Info, format!("Detected {}", info.chip));
        Ok(info)
    }

    /// Close the transport and return to `idle`.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner();
        let current = inner.state;
        match current {
            SessionState::Idle => return Ok(()),
            SessionState::Connecting => {
                drop(inner);
                return Err(self.report(Error::SessionBusy));
            },
            state @ SessionState::Flashing => {
                drop(inner);
                return Err(self.report(Error::InvalidState {
                    operation: "disconnect",
                    state,
                }));
            },
            SessionState::Connected | SessionState::Error => {},
        }

        let closed = self.io().transport.take().map(|mut t| t.close());
        inner.state = SessionState::Idle;
        drop(inner);

        if let Some(Err(e)) = closed {
            debug!("Error while closing transport: {e}");
        }
        self.log(Severity::Info, "Disconnected");
        Ok(())
    }

    /// Load firmware from `source` for `offset`.
    ///
    /// Failures are reported to the sink but never change the session state.
    pub fn load_firmware(&self, source: &FirmwareSource, offset: u32) -> Result<FirmwareImage> {
        match source.load(offset) {
            Ok(image) => {
                self.log(
                    Severity::Info,
                    format!("Loaded {} bytes from {source}", image.len()),
                );
                Ok(image)
            },
            Err(e) => Err(self.report(e)),
        }
    }

    /// Move `connected` → `flashing`, or reject.
    fn begin(&self, operation: &'static str) -> Result<()> {
        let mut inner = self.inner();
        let current = inner.state;
        match current {
            SessionState::Connected => {
                inner.state = SessionState::Flashing;
                Ok(())
            },
            SessionState::Flashing => {
                drop(inner);
                Err(self.report(Error::SessionBusy))
            },
            state => {
                drop(inner);
                Err(self.report(Error::InvalidState { operation, state }))
            },
        }
    }

    /// Run a flasher call with a fresh progress reporter, then settle the
    /// state. Must follow a successful [`Session::begin`].
    fn run<T>(
        &self,
        total_bytes: usize,
        op: impl FnOnce(&mut dyn Flasher, &mut dyn Transport, &mut ProgressReporter<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut progress = ProgressReporter::new(&*self.sink, total_bytes);

        let result = {
            let mut io = self.io();
            let Io { transport, flasher } = &mut *io;
            let result = match transport.as_deref_mut() {
                Some(transport) => op(&mut **flasher, transport, &mut progress),
                None => Err(Error::FlasherProtocol("transport is not open".to_string())),
            };
            if result.is_err() {
                if let Some(mut t) = transport.take() {
                    if let Err(e) = t.close() {
                        debug!("Error while closing transport after failure: {e}");
                    }
                }
            }
            result
        };

        match result {
            Ok(value) => {
                progress.finish();
                self.inner().state = SessionState::Connected;
                Ok(value)
            },
            Err(e) => {
                progress.fail();
                let message = match e {
                    Error::FlasherProtocol(message) => message,
                    other => other.to_string(),
                };
                {
                    let mut inner = self.inner();
                    inner.state = SessionState::Error;
                    inner.last_error = Some(message.clone());
                }
                Err(self.report(Error::FlasherProtocol(message)))
            },
        }
    }

    fn report(&self, error: Error) -> Error {
        self.log(Severity::Error, error.to_string());
        error
    }

    fn log(&self, severity: Severity, message: impl Into<String>) {
        self.sink.on_event(&LifecycleEvent::log(severity, message));
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io(&self) -> MutexGuard<'_, Io> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("Session")
            .field("state", &inner.state)
            .field("port_name", &inner.port_name)
            .field("baud_rate", &inner.baud_rate)
            .field("generation", &inner.generation)
            .field("simulated", &self.simulated)
            .finish_non_exhaustive()
    }
}
