//! Flash, erase and chip-id command implementations.
//!
//! Each command builds one [`Session`] and maps the user action onto the
//! session operations: connect, then flash / erase / identify, then
//! disconnect.

use anyhow::{Context, Result};
use console::style;
use espflow::{
    Chip, DemoFlasher, DemoHost, FirmwareImage, FirmwareSource, FlasherProvider, NativeHost,
    ResetMode, Session, parse_offset,
};
use log::{debug, warn};
use rust_i18n::t;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::firmware::{human_size, resolve_firmware};
use crate::config::Config;
use crate::serial::{DialoguerPicker, SerialOptions, ask_remember_port};
use crate::sink::ConsoleSink;
use crate::{BusyGuard, Cli, CliError, was_interrupted};

/// Baud rate used when neither the command line nor config names one.
const DEFAULT_BAUD: u32 = 115_200;

/// Pace of the simulated writer, so demo progress is visible.
const DEMO_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// Size of the blank image flashed when a download falls back to demo mode.
const DEMO_IMAGE_SIZE: usize = 256 * 1024;

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled(t!("error.interrupted").to_string()).into())
    } else {
        Ok(())
    }
}

/// Target chip: command line, then config, then auto-detect.
fn resolve_chip(cli: &Cli, config: &Config) -> Result<Chip> {
    if let Some(chip) = cli.chip {
        return Ok(chip);
    }
    match config.flash.chip.as_deref() {
        Some(name) => Chip::from_name(name).ok_or_else(|| {
            CliError::Config(t!("error.invalid_chip", chip = name).to_string()).into()
        }),
        None => Ok(Chip::Auto),
    }
}

fn resolve_reset_mode(name: Option<&str>, default: ResetMode) -> Result<ResetMode> {
    match name {
        Some(name) => ResetMode::from_name(name).ok_or_else(|| {
            CliError::Config(t!("error.invalid_reset_mode", mode = name).to_string()).into()
        }),
        None => Ok(default),
    }
}

fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Build the session for this invocation: demo parts when asked for (or as a
/// fallback when esptool is missing), real serial ports and esptool otherwise.
pub(crate) fn open_session(cli: &Cli, config: &Config) -> Result<Session> {
    let sink = Arc::new(ConsoleSink::new(cli.quiet));

    if cli.demo {
        return Ok(demo_session(sink));
    }

    let chip = resolve_chip(cli, config)?;
    let before = resolve_reset_mode(config.flash.before.as_deref(), ResetMode::DefaultReset)?;
    let after = resolve_reset_mode(config.flash.after.as_deref(), ResetMode::HardReset)?;

    let provider = if !cli.flasher.is_empty() {
        FlasherProvider::with_candidates(&cli.flasher)
    } else if !config.flasher.candidates.is_empty() {
        FlasherProvider::with_candidates(&config.flasher.candidates)
    } else {
        FlasherProvider::new()
    };

    let flasher = match provider.resolve() {
        Ok(flasher) => flasher,
        Err(e) if cli.demo_fallback => {
            warn!("{e}");
            eprintln!(
                "{} {}",
                style("⚠").yellow(),
                style(t!("demo.fallback")).yellow()
            );
            return Ok(demo_session(sink));
        },
        Err(e) => return Err(e).context(t!("error.flasher_hint").to_string()),
    };
    debug!("Resolved flasher {}", flasher.candidate());

    let flasher = flasher.with_chip(chip).with_reset_modes(before, after);

    let options = SerialOptions {
        port: cli
            .port
            .clone()
            .or_else(|| config.port.connection.serial.clone()),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };
    let host = NativeHost::new(DialoguerPicker::new(options, config));

    Ok(Session::new(host, flasher, sink))
}

/// Load the image, or with `--demo-fallback` turn a failed download into a
/// demo run of a blank image at the same offset.
fn load_or_fallback(
    cli: &Cli,
    session: Session,
    source: &FirmwareSource,
    offset: u32,
) -> Result<(Session, FirmwareImage)> {
    match session.load_firmware(source, offset) {
        Ok(image) => Ok((session, image)),
        Err(e @ espflow::Error::FirmwareLoad(_)) if cli.demo_fallback && source.is_remote() => {
            warn!("{e}");
            eprintln!(
                "{} {}",
                style("⚠").yellow(),
                style(t!("demo.fetch_fallback")).yellow()
            );
            let session = if session.is_simulated() {
                session
            } else {
                demo_session(Arc::new(ConsoleSink::new(cli.quiet)))
            };
            Ok((session, FirmwareImage::demo(DEMO_IMAGE_SIZE, offset)?))
        },
        Err(e) => Err(e.into()),
    }
}

fn demo_session(sink: Arc<ConsoleSink>) -> Session {
    Session::new(
        DemoHost::new(),
        DemoFlasher::new().with_chunk_delay(DEMO_CHUNK_DELAY),
        sink,
    )
}

/// Connect the session and offer to remember an unrecognized device.
fn connect(cli: &Cli, config: &mut Config, session: &Session) -> Result<()> {
    let baud = resolve_baud(cli, config);
    if !cli.quiet {
        eprintln!("{} {}", style("⏳").yellow(), t!("common.waiting_device", baud = baud));
    }

    session.connect(baud)?;

    if !cli.non_interactive && !session.is_simulated() {
        if let Some(port) = session.port_name() {
            ask_remember_port(&port, config)?;
        }
    }
    ensure_not_interrupted()
}

/// Disconnect on the way out; a failed disconnect never masks the result.
fn finish<T>(session: &Session, result: Result<T>) -> Result<T> {
    if let Err(e) = session.disconnect() {
        debug!("Disconnect failed: {e}");
    }
    result
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    firmware: Option<&str>,
    offset: Option<&str>,
    erase_first: bool,
) -> Result<()> {
    let source = resolve_firmware(firmware, cli.non_interactive, cli.quiet)?;
    let offset = offset.or(config.flash.offset.as_deref()).unwrap_or("");
    let offset = parse_offset(offset).map_err(|e| CliError::Usage(e.to_string()))?;

    let session = open_session(cli, config)?;

    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("flash.loading_firmware", path = source.to_string())
        );
    }
    let (session, image) = load_or_fallback(cli, session, &source, offset)?;

    if !cli.quiet {
        eprintln!(
            "    {} {}",
            style("•").dim(),
            t!(
                "flash.image_summary",
                size = human_size(image.len() as u64),
                offset = format!("0x{offset:08X}")
            )
        );
        if let Some(header) = image.header() {
            eprintln!(
                "    {} {}",
                style("•").dim(),
                t!(
                    "flash.image_header",
                    chip = header.chip.to_string(),
                    mode = header.flash_mode.to_string(),
                    size = header.flash_size_label()
                )
            );
        }
    }

    let result = (|| -> Result<_> {
        connect(cli, config, &session)?;

        let _busy = BusyGuard::enter();
        if erase_first {
            if !cli.quiet {
                eprintln!("{} {}", style("🗑").red(), t!("erase.erasing"));
            }
            session.erase()?;
        }

        let outcome = session.flash(&image)?;
        ensure_not_interrupted()?;
        Ok(outcome)
    })();
    let outcome = finish(&session, result)?;

    if !cli.quiet {
        eprintln!(
            "\n{} {}",
            style("🎉").green().bold(),
            t!(
                "flash.completed",
                size = human_size(outcome.bytes_written as u64),
                secs = format!("{:.1}", outcome.elapsed.as_secs_f64())
            )
        );
        if outcome.simulated {
            eprintln!("{}", style(t!("demo.nothing_written")).dim());
        }
    }

    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &mut Config, all: bool) -> Result<()> {
    if !all {
        if !cli.quiet {
            eprintln!("{} {}", style("⚠").yellow(), t!("erase.use_all_flag"));
        }
        return Err(CliError::Usage(t!("erase.need_all_flag").to_string()).into());
    }

    let session = open_session(cli, config)?;

    let result = (|| -> Result<_> {
        connect(cli, config, &session)?;
        let _busy = BusyGuard::enter();
        if !cli.quiet {
            eprintln!("{} {}", style("🗑").red(), t!("erase.erasing"));
        }
        session.erase()?;
        ensure_not_interrupted()
    })();
    finish(&session, result)?;

    if !cli.quiet {
        eprintln!("\n{} {}", style("✓").green().bold(), t!("erase.completed"));
    }

    Ok(())
}

/// Chip-id command implementation.
pub(crate) fn cmd_chip_id(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let session = open_session(cli, config)?;

    let result = (|| -> Result<_> {
        connect(cli, config, &session)?;
        let _busy = BusyGuard::enter();
        Ok(session.identify()?)
    })();
    let info = finish(&session, result)?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "chip": info.chip,
                "revision": info.revision,
                "features": info.features,
                "crystal": info.crystal,
                "mac": info.mac,
                "simulated": session.is_simulated(),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("\n{}", style(t!("chip_id.header")).bold().underlined());
    eprintln!("  {}: {}", t!("chip_id.chip"), style(&info.chip).cyan().bold());
    if let Some(revision) = &info.revision {
        eprintln!("  {}: {revision}", t!("chip_id.revision"));
    }
    if !info.features.is_empty() {
        eprintln!("  {}: {}", t!("chip_id.features"), info.features.join(", "));
    }
    if let Some(crystal) = &info.crystal {
        eprintln!("  {}: {crystal}", t!("chip_id.crystal"));
    }
    if let Some(mac) = &info.mac {
        eprintln!("  {}: {mac}", t!("chip_id.mac"));
    }

    Ok(())
}
