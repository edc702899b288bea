//! espflow CLI - Command-line tool for flashing ESP32-class chips.
//!
//! ## Features
//!
//! - Flash application images from files or HTTP URLs
//! - Erase flash memory and identify the connected chip
//! - Inspect ESP application image headers
//! - Interactive serial port selection
//! - Demo mode that simulates the whole flashing lifecycle
//! - Shell completion generation
//! - Environment variable support
//! - Internationalization (i18n) support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use espflow::Chip;
use log::debug;
use rust_i18n::t;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod help;
mod serial;
mod sink;

use config::Config;

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by Ctrl-C while a device operation is running.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether a device operation is running right now.
static BUSY: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed during a device operation.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Marks a device operation as running until dropped.
pub(crate) struct BusyGuard(());

impl BusyGuard {
    pub(crate) fn enter() -> Self {
        BUSY.store(true, Ordering::SeqCst);
        Self(())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        BUSY.store(false, Ordering::SeqCst);
    }
}

/// CLI errors that carry their own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or an ambiguous choice in non-interactive mode.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration value.
    #[error("{0}")]
    Config(String),
    /// Interrupted or dismissed by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error onto the process exit code.
///
/// 0 success, 1 generic, 2 usage, 3 config, 4 device, 130 cancelled.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<espflow::Error>() {
        Some(espflow::Error::Config(_)) => 3,
        Some(e) if e.is_device_error() => 4,
        _ => 1,
    }
}

/// espflow - A cross-platform front-end for flashing ESP32-class chips.
///
/// Environment variables:
///   ESPFLOW_PORT              - Default serial port
///   ESPFLOW_BAUD              - Default baud rate (default: 115200)
///   ESPFLOW_CHIP              - Target chip (auto, esp32, esp32s3, ...)
///   ESPFLOW_FLASHER           - esptool command(s), comma-separated
///   ESPFLOW_DEMO              - Simulate flashing without hardware
///   ESPFLOW_LANG              - Language/locale (en, vi)
///   ESPFLOW_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "espflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/espflow/espflow")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ESPFLOW_PORT")]
    port: Option<String>,

    /// Baud rate for the connection [default: 115200].
    #[arg(short, long, global = true, env = "ESPFLOW_BAUD")]
    baud: Option<u32>,

    /// Target chip (auto, esp32, esp32s2, esp32s3, esp32c3, ...).
    #[arg(short, long, global = true, env = "ESPFLOW_CHIP", value_parser = parse_chip)]
    chip: Option<Chip>,

    /// esptool command to use instead of the built-in search list (repeatable).
    #[arg(long, global = true, env = "ESPFLOW_FLASHER", value_delimiter = ',')]
    flasher: Vec<String>,

    /// Simulate the device and flasher; nothing is written to hardware.
    #[arg(long, global = true, env = "ESPFLOW_DEMO")]
    demo: bool,

    /// Fall back to demo mode when no esptool can be found or a firmware
    /// download fails.
    #[arg(long, global = true)]
    demo_fallback: bool,

    /// Language/locale for messages (e.g., en, vi).
    #[arg(long, global = true, env = "ESPFLOW_LANG")]
    lang: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ESPFLOW_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Connect, then write a firmware image to flash.
    Flash {
        /// Firmware file or http(s) URL (auto-discovered if omitted).
        firmware: Option<String>,

        /// Flash offset (e.g. 0x10000, 65536, e000) [default: 0x0].
        #[arg(short, long)]
        offset: Option<String>,

        /// Erase the entire flash before writing.
        #[arg(long)]
        erase_first: bool,
    },

    /// Erase flash memory.
    Erase {
        /// Erase entire flash (required confirmation).
        #[arg(long)]
        all: bool,
    },

    /// Identify the connected chip.
    ChipId {
        /// Output chip information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show information about a firmware image.
    Info {
        /// Firmware file or http(s) URL.
        firmware: String,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a chip name for `--chip`.
fn parse_chip(s: &str) -> Result<Chip, String> {
    Chip::from_name(s).ok_or_else(|| format!("unknown chip '{s}'"))
}

/// Extract `--lang` before clap runs so help text is localized.
fn early_lang(raw_args: &[String]) -> Option<String> {
    let mut lang = None;
    for (i, arg) in raw_args.iter().enumerate() {
        if arg == "--" {
            break;
        }
        if let Some(val) = arg.strip_prefix("--lang=") {
            lang = Some(val.to_string());
        } else if arg == "--lang" {
            lang = raw_args.get(i + 1).cloned();
        }
    }
    lang.or_else(|| env::var("ESPFLOW_LANG").ok())
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if BUSY.load(Ordering::SeqCst) {
            INTERRUPTED.store(true, Ordering::SeqCst);
            eprintln!(
                "\n{} {}",
                style("⚠").yellow(),
                style(t!("common.interrupt_deferred")).yellow()
            );
        } else {
            let _ = console::Term::stderr().show_cursor();
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
}

fn main() {
    let raw_args: Vec<String> = env::args().collect();

    let locale = early_lang(&raw_args).map_or_else(help::detect_locale, |l| help::match_locale(&l));
    rust_i18n::set_locale(&locale);

    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Localized help for -h/--help or a bare invocation
    let wants_help = raw_args
        .iter()
        .skip(1)
        .take_while(|a| a.as_str() != "--")
        .any(|a| a == "-h" || a == "--help");
    if wants_help || raw_args.len() <= 1 {
        print_localized_help(&raw_args);
        std::process::exit(0);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "espflow v{} (locale: {locale}, verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn print_localized_help(raw_args: &[String]) {
    let mut app = help::build_localized_command();
    let sub_name = raw_args
        .iter()
        .skip(1)
        .find(|token| app.find_subcommand(token.as_str()).is_some())
        .cloned();

    let result = match sub_name.and_then(|name| app.find_subcommand(&name).cloned()) {
        Some(mut sub) => sub.print_help(),
        None => app.print_help(),
    };
    if let Err(e) = result {
        debug!("Failed to print help: {e}");
    }
}

/// Set up env_logger from -v/-q; RUST_LOG still wins.
fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            offset,
            erase_first,
        } => commands::flash::cmd_flash(
            cli,
            &mut config,
            firmware.as_deref(),
            offset.as_deref(),
            *erase_first,
        ),
        Commands::Erase { all } => commands::flash::cmd_erase(cli, &mut config, *all),
        Commands::ChipId { json } => commands::flash::cmd_chip_id(cli, &mut config, *json),
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(&config, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
