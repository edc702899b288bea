//! Terminal rendering of session events.

use std::sync::{Mutex, PoisonError};

use console::style;
use espflow::{EventSink, LifecycleEvent, Phase, ProgressEvent, Severity};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use rust_i18n::t;

use crate::use_fancy_output;

/// Draws progress with indicatif and log lines with console styling.
///
/// A fresh bar is started for every operation and finished on its terminal
/// phase. Error lines are not printed here: the same failure comes back as
/// the operation's `Err` and is reported once by `main`.
pub struct ConsoleSink {
    quiet: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleSink {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: Mutex::new(None),
        }
    }

    fn new_bar(&self) -> ProgressBar {
        if self.quiet || !use_fancy_output() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb
    }

    fn on_progress(&self, progress: &ProgressEvent) {
        let mut slot = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        let pb = slot.get_or_insert_with(|| self.new_bar());

        pb.set_position(u64::from(progress.percent()));
        pb.set_message(phase_label(progress.phase));

        if progress.phase.is_terminal() {
            if progress.phase == Phase::Done {
                pb.finish_with_message(t!("common.complete").to_string());
            } else {
                pb.abandon_with_message(style(t!("common.failed")).red().to_string());
            }
            *slot = None;
        }
    }

    fn on_log(&self, message: &str, severity: Severity) {
        let line = match severity {
            Severity::Info if self.quiet => return,
            Severity::Success if self.quiet => return,
            Severity::Info => format!("{} {message}", style("ℹ").blue()),
            Severity::Success => format!("{} {message}", style("✓").green()),
            Severity::Warning => format!("{} {}", style("⚠").yellow(), style(message).yellow()),
            Severity::Error => {
                debug!("session error: {message}");
                return;
            },
        };

        let slot = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(pb) => pb.suspend(|| eprintln!("{line}")),
            None => eprintln!("{line}"),
        }
    }
}

impl EventSink for ConsoleSink {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Progress(p) => self.on_progress(p),
            LifecycleEvent::Log { message, severity } => self.on_log(message, *severity),
        }
    }
}

fn phase_label(phase: Phase) -> String {
    match phase {
        Phase::Connecting => t!("phase.connecting"),
        Phase::Handshaking => t!("phase.handshaking"),
        Phase::Erasing => t!("phase.erasing"),
        Phase::Writing => t!("phase.writing"),
        Phase::Verifying => t!("phase.verifying"),
        Phase::Done => t!("phase.done"),
        Phase::Failed => t!("phase.failed"),
    }
    .to_string()
}
