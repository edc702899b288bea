//! Out-of-process esptool flasher.
//!
//! Each operation spawns the resolved esptool command against the session's
//! port. The session's transport is suspended for the duration of the child
//! process, since the tool opens the device node itself, and resumed once it
//! exits. Progress is scraped from the tool's stdout.

use std::fmt;
use std::io::{Read, Write};
use std::process::{Child, Stdio};
use std::thread;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::event::{Phase, ProgressReporter, Severity};
use crate::firmware::FirmwareImage;
use crate::flasher::provider::FlasherCandidate;
use crate::flasher::{Chip, ChipInfo, Flasher};
use crate::port::Transport;

/// Reset strategy passed as `--before` / `--after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResetMode {
    /// DTR/RTS reset into the bootloader.
    DefaultReset,
    /// Reset via RTS after the operation.
    HardReset,
    /// Jump to the application without a chip reset.
    SoftReset,
    /// Leave the chip alone.
    NoReset,
    /// Skip reset and the sync handshake.
    NoResetNoSync,
    /// Reset through the USB-JTAG/serial peripheral.
    UsbReset,
}

impl ResetMode {
    /// esptool argument value.
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::DefaultReset => "default_reset",
            Self::HardReset => "hard_reset",
            Self::SoftReset => "soft_reset",
            Self::NoReset => "no_reset",
            Self::NoResetNoSync => "no_reset_no_sync",
            Self::UsbReset => "usb_reset",
        }
    }

    /// Parse an esptool reset name; `-` and `_` are interchangeable.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().replace('-', "_").to_lowercase().as_str() {
            "default_reset" => Some(Self::DefaultReset),
            "hard_reset" => Some(Self::HardReset),
            "soft_reset" => Some(Self::SoftReset),
            "no_reset" => Some(Self::NoReset),
            "no_reset_no_sync" => Some(Self::NoResetNoSync),
            "usb_reset" => Some(Self::UsbReset),
            _ => None,
        }
    }
}

impl fmt::Display for ResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Flasher backed by an esptool process.
#[derive(Debug, Clone)]
pub struct ExternalFlasher {
    candidate: FlasherCandidate,
    version: Option<String>,
    label: String,
    chip: Chip,
    before: ResetMode,
    after: ResetMode,
}

impl ExternalFlasher {
    /// Flasher invoking `candidate`, chip auto-detected, default resets.
    pub fn new(candidate: FlasherCandidate) -> Self {
        let label = candidate.to_string();
        Self {
            candidate,
            version: None,
            label,
            chip: Chip::Auto,
            before: ResetMode::DefaultReset,
            after: ResetMode::HardReset,
        }
    }

    /// Record the version reported by the tool.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.label = format!("{} {version}", self.candidate);
        self.version = Some(version);
        self
    }

    /// Target a specific chip instead of auto-detection.
    #[must_use]
    pub fn with_chip(mut self, chip: Chip) -> Self {
        self.chip = chip;
        self
    }

    /// Override the `--before`/`--after` reset modes.
    #[must_use]
    pub fn with_reset_modes(mut self, before: ResetMode, after: ResetMode) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    /// Command the flasher runs.
    pub fn candidate(&self) -> &FlasherCandidate {
        &self.candidate
    }

    /// Version string reported at resolution time.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Chip passed as `--chip`.
    pub fn chip(&self) -> Chip {
        self.chip
    }

    /// Full esptool argument list (after the candidate's prefix args).
    pub fn build_args(&self, port: &str, baud: u32, operation: &[&str]) -> Vec<String> {
        let mut args = vec![
            "--chip".to_string(),
            self.chip.esptool_name().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--baud".to_string(),
            baud.to_string(),
            "--before".to_string(),
            self.before.as_arg().to_string(),
            "--after".to_string(),
            self.after.as_arg().to_string(),
        ];
        args.extend(operation.iter().map(|s| (*s).to_string()));
        args
    }

    /// Run one esptool operation with the transport suspended.
    fn run(
        &self,
        transport: &mut dyn Transport,
        operation: &[&str],
        progress: Option<&mut ProgressReporter<'_>>,
    ) -> Result<Vec<String>> {
        let port = transport.name().to_string();
        let args = self.build_args(&port, transport.baud_rate(), operation);

        transport.suspend()?;
        let result = self.run_child(&args, progress);
        let resumed = transport.resume();

        let lines = result?;
        if let Err(e) = resumed {
            warn!("Could not reopen {port} after {}: {e}", self.candidate);
            return Err(e);
        }
        Ok(lines)
    }

    fn run_child(
        &self,
        args: &[String],
        mut progress: Option<&mut ProgressReporter<'_>>,
    ) -> Result<Vec<String>> {
        let mut cmd = self.candidate.command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Keep terminal interrupts away from the tool while it writes flash.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        debug!("Running {} {}", self.candidate, args.join(" "));
        let mut child: Child = cmd
            .spawn()
            .map_err(|e| Error::FlasherProtocol(format!("failed to start {}: {e}", self.candidate)))?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let mut lines = Vec::new();
        let read = match child.stdout.take() {
            Some(stdout) => read_lines(stdout, &mut lines, progress.as_deref_mut()),
            None => Ok(()),
        };

        if let Err(e) = read {
            // The tool must not outlive the operation that owns the port
            abort_child(&mut child, stderr_reader);
            return Err(Error::FlasherProtocol(format!(
                "lost output of {}: {e}",
                self.candidate
            )));
        }

        let status = child.wait()?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(lines);
        }

        Err(Error::FlasherProtocol(failure_message(&lines, &stderr).unwrap_or_else(
            || format!("{} exited with {status}", self.candidate),
        )))
    }
}

impl Flasher for ExternalFlasher {
    fn name(&self) -> &str {
        &self.label
    }

    fn identify(&mut self, transport: &mut dyn Transport) -> Result<ChipInfo> {
        let lines = self.run(transport, &["chip_id"], None)?;
        parse_chip_info(&lines)
            .ok_or_else(|| Error::FlasherProtocol("tool did not report a chip".to_string()))
    }

    fn flash_data(
        &mut self,
        transport: &mut dyn Transport,
        image: &FirmwareImage,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("espflow-")
            .suffix(".bin")
            .tempfile()?;
        file.write_all(image.bytes())?;
        file.flush()?;

        let offset = format!("{:#x}", image.offset());
        let path = file.path().to_string_lossy().into_owned();

        progress.phase_changed(Phase::Handshaking);
        self.run(transport, &["write_flash", &offset, &path], Some(progress))?;
        Ok(())
    }

    fn erase(
        &mut self,
        transport: &mut dyn Transport,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        progress.phase_changed(Phase::Handshaking);
        self.run(transport, &["erase_flash"], Some(progress))?;
        Ok(())
    }
}

/// Split `stdout` into trimmed lines on `\r` and `\n`, feeding each one to
/// the reporter as it arrives.
fn read_lines(
    mut stdout: impl Read,
    lines: &mut Vec<String>,
    mut progress: Option<&mut ProgressReporter<'_>>,
) -> std::io::Result<()> {
    let mut buf = [0u8; 512];
    let mut pending = Vec::new();
    loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for &byte in &buf[..n] {
            if byte == b'\r' || byte == b'\n' {
                take_line(&mut pending, lines, progress.as_deref_mut());
            } else {
                pending.push(byte);
            }
        }
    }
    take_line(&mut pending, lines, progress.as_deref_mut());
    Ok(())
}

/// Kill and reap a child whose output can no longer be followed.
fn abort_child(child: &mut Child, stderr_reader: Option<thread::JoinHandle<String>>) {
    if let Err(e) = child.kill() {
        debug!("Could not kill flasher process {}: {e}", child.id());
    }
    match child.wait() {
        Ok(status) => debug!("Flasher process {} stopped: {status}", child.id()),
        Err(e) => debug!("Could not reap flasher process {}: {e}", child.id()),
    }
    if let Some(handle) = stderr_reader {
        if handle.join().is_err() {
            debug!("stderr reader panicked");
        }
    }
}

fn take_line(pending: &mut Vec<u8>, lines: &mut Vec<String>, progress: Option<&mut ProgressReporter<'_>>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    if line.is_empty() {
        return;
    }
    trace!("esptool: {line}");
    if let Some(progress) = progress {
        apply_line(&line, progress);
    }
    lines.push(line);
}

/// Feed one line of tool output into the reporter.
fn apply_line(line: &str, progress: &mut ProgressReporter<'_>) {
    if let Some(phase) = detect_phase(line) {
        if phase != progress.phase() {
            progress.phase_changed(phase);
        }
    }
    if progress.phase() == Phase::Writing {
        if let Some(percent) = parse_progress_percent(line) {
            progress.advance_percent(percent);
        }
    }
    if line.starts_with("WARNING") || line.starts_with("Warning") {
        progress.log(Severity::Warning, line);
    }
}

/// Phase announced by a line of esptool output.
pub fn detect_phase(line: &str) -> Option<Phase> {
    if line.starts_with("Connecting") || line.starts_with("Uploading stub") {
        Some(Phase::Handshaking)
    } else if line.starts_with("Erasing") || line.starts_with("Flash will be erased") {
        Some(Phase::Erasing)
    } else if line.starts_with("Writing at") {
        Some(Phase::Writing)
    } else if line.starts_with("Hash of data verified") {
        Some(Phase::Verifying)
    } else {
        None
    }
}

/// Extract a percentage from a progress line.
///
/// Understands `(NN %)` and `NN.N%`.
pub fn parse_progress_percent(line: &str) -> Option<f32> {
    let end = line.rfind('%')?;
    let head = line[..end].trim_end();
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map_or(0, |i| i + 1);
    let number = &head[start..];
    if number.is_empty() {
        return None;
    }
    number
        .parse::<f32>()
        .ok()
        .filter(|p| (0.0..=100.0).contains(p))
}

/// Collect chip identification from esptool output.
pub fn parse_chip_info(lines: &[String]) -> Option<ChipInfo> {
    let mut info = ChipInfo::default();
    let mut found = false;

    for line in lines {
        let line = line.trim();
        if let Some(rest) = line
            .strip_prefix("Chip is ")
            .or_else(|| line.strip_prefix("Chip type:"))
        {
            let rest = rest.trim();
            if let Some(idx) = rest.find("(revision ") {
                info.chip = rest[..idx].trim().to_string();
                let rev = &rest[idx + "(revision ".len()..];
                info.revision = Some(rev.trim_end_matches(')').trim().to_string());
            } else {
                info.chip = rest.to_string();
            }
            found = true;
        } else if let Some(rest) = line.strip_prefix("Features:") {
            info.features = rest
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        } else if let Some(rest) = line
            .strip_prefix("Crystal is ")
            .or_else(|| line.strip_prefix("Crystal frequency:"))
        {
            info.crystal = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("MAC:") {
            info.mac = Some(rest.trim().to_string());
        }
    }

    found.then_some(info)
}

/// Best human-readable reason from a failed run.
fn failure_message(stdout: &[String], stderr: &str) -> Option<String> {
    const FATAL: &str = "A fatal error occurred:";

    let all = stdout
        .iter()
        .map(String::as_str)
        .chain(stderr.lines().map(str::trim));
    for line in all {
        if let Some(reason) = line.split_once(FATAL).map(|(_, r)| r.trim()) {
            if !reason.is_empty() {
                return Some(reason.to_string());
            }
        }
    }

    stderr
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemorySink;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_build_args() {
        let flasher = ExternalFlasher::new(FlasherCandidate::parse("python3 -m esptool").unwrap())
            .with_chip(Chip::Esp32s3);
        let args = flasher.build_args("/dev/ttyACM0", 460800, &["write_flash", "0x0", "fw.bin"]);
        assert_eq!(
            args,
            vec![
                "--chip",
                "esp32s3",
                "--port",
                "/dev/ttyACM0",
                "--baud",
                "460800",
                "--before",
                "default_reset",
                "--after",
                "hard_reset",
                "write_flash",
                "0x0",
                "fw.bin"
            ]
        );
    }

    #[test]
    fn test_reset_mode_names() {
        assert_eq!(ResetMode::from_name("no-reset"), Some(ResetMode::NoReset));
        assert_eq!(ResetMode::from_name("USB_RESET"), Some(ResetMode::UsbReset));
        assert_eq!(ResetMode::from_name("reboot"), None);
        assert_eq!(ResetMode::SoftReset.to_string(), "soft_reset");
    }

    #[test]
    fn test_parse_progress_percent() {
        assert_eq!(parse_progress_percent("Writing at 0x00010000... (12 %)"), Some(12.0));
        assert_eq!(
            parse_progress_percent("Writing at 0x0001e000 [=====>     ]  45.2% 45056/98304 bytes..."),
            Some(45.2)
        );
        assert_eq!(parse_progress_percent("Writing at 0x00000000... (100 %)"), Some(100.0));
        assert_eq!(parse_progress_percent("Compressed 1228800 bytes"), None);
        assert_eq!(parse_progress_percent("(%)"), None);
        assert_eq!(parse_progress_percent("(250 %)"), None);
    }

    #[test]
    fn test_detect_phase() {
        assert_eq!(detect_phase("Connecting...."), Some(Phase::Handshaking));
        assert_eq!(
            detect_phase("Erasing flash (this may take a while)..."),
            Some(Phase::Erasing)
        );
        assert_eq!(detect_phase("Writing at 0x00001000... (5 %)"), Some(Phase::Writing));
        assert_eq!(detect_phase("Hash of data verified."), Some(Phase::Verifying));
        assert_eq!(detect_phase("Leaving..."), None);
    }

    #[test]
    fn test_parse_chip_info_v4() {
        let out = lines(
            "Connecting....\n\
             Chip is ESP32-D0WD-V3 (revision v3.1)\n\
             Features: WiFi, BT, Dual Core, 240MHz, VRef calibration in efuse\n\
             Crystal is 40MHz\n\
             MAC: 24:0a:c4:12:34:56\n\
             Chip ID: 0x00123456",
        );
        let info = parse_chip_info(&out).unwrap();
        assert_eq!(info.chip, "ESP32-D0WD-V3");
        assert_eq!(info.revision.as_deref(), Some("v3.1"));
        assert_eq!(info.features.len(), 5);
        assert_eq!(info.features[0], "WiFi");
        assert_eq!(info.crystal.as_deref(), Some("40MHz"));
        assert_eq!(info.mac.as_deref(), Some("24:0a:c4:12:34:56"));
    }

    #[test]
    fn test_parse_chip_info_v5() {
        let out = lines(
            "Chip type:          ESP32-S3 (QFN56) (revision v0.2)\n\
             Features:           Wi-Fi, BT 5 (LE), Dual Core + LP Core, 240MHz\n\
             Crystal frequency:  40MHz\n\
             MAC:                f4:12:fa:00:11:22",
        );
        let info = parse_chip_info(&out).unwrap();
        assert_eq!(info.chip, "ESP32-S3 (QFN56)");
        assert_eq!(info.revision.as_deref(), Some("v0.2"));
        assert_eq!(info.crystal.as_deref(), Some("40MHz"));
        assert_eq!(info.mac.as_deref(), Some("f4:12:fa:00:11:22"));
    }

    #[test]
    fn test_parse_chip_info_missing() {
        assert!(parse_chip_info(&lines("Connecting....\nLeaving...")).is_none());
    }

    #[test]
    fn test_apply_line_drives_reporter() {
        let sink = MemorySink::new();
        let mut reporter = ProgressReporter::new(&sink, 1000);
        for line in [
            "Connecting....",
            "Compressed 1000 bytes to 100...",
            "Writing at 0x00000000... (50 %)",
            "Writing at 0x00000400... (100 %)",
            "WARNING: Detected crystal freq 41.01MHz",
            "Hash of data verified.",
        ] {
            apply_line(line, &mut reporter);
        }

        assert_eq!(reporter.phase(), Phase::Verifying);
        assert_eq!(reporter.bytes_written(), 1000);
        let written: Vec<usize> = sink
            .progress()
            .iter()
            .filter(|p| p.phase == Phase::Writing)
            .map(|p| p.bytes_written)
            .collect();
        assert_eq!(written, vec![0, 500, 1000]);
        assert_eq!(sink.logs(Severity::Warning).len(), 1);
    }

    #[test]
    fn test_failure_message() {
        let stdout = lines("Connecting......\nA fatal error occurred: Failed to connect to ESP32: No serial data received.");
        assert_eq!(
            failure_message(&stdout, "").as_deref(),
            Some("Failed to connect to ESP32: No serial data received.")
        );
        assert_eq!(
            failure_message(&[], "Traceback\nPermissionError: [Errno 13]\n").as_deref(),
            Some("PermissionError: [Errno 13]")
        );
        assert!(failure_message(&[], "").is_none());
    }

    #[test]
    fn test_missing_tool_fails_and_resumes_transport() {
        let mut flasher = ExternalFlasher::new(
            FlasherCandidate::parse("espflow-definitely-not-installed-tool").unwrap(),
        );
        let mut transport = crate::port::NullTransport::new("/dev/null-port", 115200);
        let err = flasher.identify(&mut transport).unwrap_err();
        assert!(matches!(err, Error::FlasherProtocol(msg) if msg.contains("failed to start")));
        assert!(transport.is_open());
    }

    /// Yields `data`, then fails.
    struct BrokenPipe<'a> {
        data: &'a [u8],
    }

    impl Read for BrokenPipe<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.data.is_empty() {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_read_lines_splits_on_cr_and_lf() {
        let mut out = Vec::new();
        read_lines(&b"Connecting...\rWriting at 0x1000 (50 %)\r\nDone"[..], &mut out, None).unwrap();
        assert_eq!(out, vec!["Connecting...", "Writing at 0x1000 (50 %)", "Done"]);
    }

    #[test]
    fn test_read_lines_reports_read_error() {
        let mut out = Vec::new();
        let err = read_lines(BrokenPipe { data: b"Chip is ESP32\npartial" }, &mut out, None)
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert_eq!(out, vec!["Chip is ESP32"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_abort_child_kills_and_reaps() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = child.stderr.take().unwrap();
        let reader = thread::spawn(move || {
            let mut text = String::new();
            let mut stderr = stderr;
            let _ = stderr.read_to_string(&mut text);
            text
        });

        let started = std::time::Instant::now();
        abort_child(&mut child, Some(reader));

        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        let status = child.try_wait().unwrap().expect("child should be reaped");
        assert!(!status.success());
    }
}
