//! Lifecycle events and the sinks that consume them.
//!
//! A [`Session`](crate::session::Session) reports everything it does as a
//! [`LifecycleEvent`]: progress of the running operation or a log line.
//! Sinks are append-only and must never block the session; the stock sinks
//! here either record in memory, forward into an unbounded channel, or hand
//! off to the `log` facade.
//!
//! Progress for a single operation is produced through a fresh
//! [`ProgressReporter`], which keeps `bytes_written` clamped and
//! non-decreasing for the lifetime of that operation.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

/// Phase of a flashing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Phase {
    /// Opening the transport.
    Connecting,
    /// Bootloader sync / stub upload (owned by the flasher).
    Handshaking,
    /// Erasing flash.
    Erasing,
    /// Writing image data.
    Writing,
    /// Verifying written data.
    Verifying,
    /// Operation completed.
    Done,
    /// Operation failed.
    Failed,
}

impl Phase {
    /// Whether no further events follow this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Erasing => "erasing",
            Self::Writing => "writing",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Byte-level progress of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressEvent {
    /// Bytes written so far.
    pub bytes_written: usize,
    /// Total bytes of the operation (0 when unknown, e.g. chip erase).
    pub total_bytes: usize,
    /// Current phase.
    pub phase: Phase,
}

impl ProgressEvent {
    /// Completion in percent, 0..=100.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return if self.phase == Phase::Done { 100 } else { 0 };
        }
        #[allow(clippy::cast_possible_truncation)]
        {
            (self.bytes_written.min(self.total_bytes) * 100 / self.total_bytes) as u8
        }
    }
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    /// Informational.
    Info,
    /// A step completed successfully.
    Success,
    /// Something the user should know about; the operation continues.
    Warning,
    /// Terminal failure of an operation.
    Error,
}

/// Event delivered to an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LifecycleEvent {
    /// Progress of the running operation.
    Progress(ProgressEvent),
    /// Human-readable log line.
    Log {
        /// Message text.
        message: String,
        /// Severity.
        severity: Severity,
    },
}

impl LifecycleEvent {
    /// Build a log event.
    pub fn log(severity: Severity, message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            severity,
        }
    }

    /// Severity if this is a log event.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::Log { severity, .. } => Some(*severity),
            Self::Progress(_) => None,
        }
    }
}

/// Consumer of lifecycle events.
///
/// Called synchronously from the session for every event, possibly once per
/// written chunk. Implementations must return quickly.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> EventSink for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event);
    }
}

/// Sink that records every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return all recorded events.
    pub fn take(&self) -> Vec<LifecycleEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Recorded progress events, in order.
    pub fn progress(&self) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::Progress(p) => Some(p),
                LifecycleEvent::Log { .. } => None,
            })
            .collect()
    }

    /// Recorded log lines with the given severity.
    pub fn logs(&self, severity: Severity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::Log {
                    message,
                    severity: s,
                } if s == severity => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Sink that forwards events into an unbounded channel.
///
/// Sending never blocks; events are dropped once the receiver is gone.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Sender<LifecycleEvent>>,
}

impl ChannelSink {
    /// Wrap the sending half of a channel.
    pub fn new(tx: Sender<LifecycleEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &LifecycleEvent) {
        let _ = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event.clone());
    }
}

/// Sink that forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Progress(p) => log::trace!(
                "{}: {}/{} bytes",
                p.phase,
                p.bytes_written,
                p.total_bytes
            ),
            LifecycleEvent::Log { message, severity } => match severity {
                Severity::Info | Severity::Success => log::info!("{message}"),
                Severity::Warning => log::warn!("{message}"),
                Severity::Error => log::error!("{message}"),
            },
        }
    }
}

/// Sink that broadcasts every event to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn on_event(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}

/// Per-operation progress emitter handed to a flasher.
///
/// `bytes_written` never exceeds `total_bytes` and never decreases, whatever
/// the flasher reports.
pub struct ProgressReporter<'a> {
    sink: &'a dyn EventSink,
    total_bytes: usize,
    bytes_written: usize,
    phase: Phase,
}

impl<'a> ProgressReporter<'a> {
    /// Start a new operation of `total_bytes` bytes.
    pub fn new(sink: &'a dyn EventSink, total_bytes: usize) -> Self {
        Self {
            sink,
            total_bytes,
            bytes_written: 0,
            phase: Phase::Connecting,
        }
    }

    /// Total bytes of this operation.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Bytes reported so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Enter a new phase and emit an event.
    pub fn phase_changed(&mut self, phase: Phase) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = phase;
        self.emit();
    }

    /// Report an absolute byte position. Regressions are ignored.
    pub fn advance_to(&mut self, bytes_written: usize) {
        let clamped = bytes_written.min(self.total_bytes);
        if clamped <= self.bytes_written || self.phase.is_terminal() {
            return;
        }
        self.bytes_written = clamped;
        self.emit();
    }

    /// Report a position in percent of the total.
    pub fn advance_percent(&mut self, percent: f32) {
        let percent = f64::from(percent.clamp(0.0, 100.0));
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let bytes = (self.total_bytes as f64 * percent / 100.0) as usize;
        self.advance_to(bytes);
    }

    /// Forward a log line from the flasher.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        self.sink
            .on_event(&LifecycleEvent::log(severity, message));
    }

    /// Mark the operation complete; `bytes_written` becomes `total_bytes`.
    pub fn finish(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.bytes_written = self.total_bytes;
        self.phase = Phase::Done;
        self.emit();
    }

    /// Mark the operation failed.
    pub fn fail(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = Phase::Failed;
        self.emit();
    }

    fn emit(&self) {
        self.sink
            .on_event(&LifecycleEvent::Progress(ProgressEvent {
                bytes_written: self.bytes_written,
                total_bytes: self.total_bytes,
                phase: self.phase,
            }));
    }
}
