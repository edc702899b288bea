//! Interactive serial port selection.
//!
//! [`DialoguerPicker`] plugs into the library's [`PortPicker`] seam so the
//! session asks the user only when it actually connects. It supports:
//! - Auto-selection of a single recognized USB bridge
//! - Interactive selection via dialoguer
//! - Devices remembered in configuration
//! - Non-interactive mode for CI/CD

use {
    crate::config::{Config, UsbDevice},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Select, theme::ColorfulTheme},
    espflow::{DetectedPort, PortPicker, detect_ports},
    log::{debug, error, info, warn},
    rust_i18n::t,
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or config.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Port picker backed by dialoguer prompts.
///
/// Dismissing a prompt (Esc / `q`) yields [`espflow::Error::DeviceNotSelected`].
#[derive(Debug, Clone)]
pub struct DialoguerPicker {
    options: SerialOptions,
    remembered: Vec<UsbDevice>,
}

impl DialoguerPicker {
    /// Picker honoring `options` and the USB devices remembered in `config`.
    pub fn new(options: SerialOptions, config: &Config) -> Self {
        Self {
            options,
            remembered: config.port.usb_device.clone(),
        }
    }

    /// Check if a port matches a known device (built-in or remembered).
    fn is_known(&self, port: &DetectedPort) -> bool {
        if port.device.is_known() {
            return true;
        }
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => self.remembered.iter().any(|d| d.matches(vid, pid)),
            _ => false,
        }
    }

    fn select_non_interactive(&self, ports: Vec<DetectedPort>) -> espflow::Result<DetectedPort> {
        // Never prompt: exactly one candidate is the only valid outcome.
        match ports.len().cmp(&1) {
            Ordering::Equal => ports.into_iter().next().ok_or(espflow::Error::DeviceNotSelected),
            Ordering::Greater => not_selected(&t!("serial.multiple_ports")),
            Ordering::Less => not_selected(&t!("serial.no_ports_available")),
        }
    }

    /// Interactive port selection.
    fn select_interactive(&self, mut ports: Vec<DetectedPort>) -> espflow::Result<DetectedPort> {
        eprintln!(
            "{} {}",
            style("ℹ").blue(),
            t!("serial.detected_ports", count = ports.len())
        );
        eprintln!("{}", style(t!("serial.known_devices_hint")).dim());

        // Known devices first
        ports.sort_by_key(|p| !self.is_known(p));

        let term_width = console::Term::stderr().size().1 as usize;
        let max_item_width = term_width.saturating_sub(4);
        let labels: Vec<String> = ports
            .iter()
            .map(|p| port_label(p, self.is_known(p)))
            .map(|label| console::truncate_str(&label, max_item_width, "\u{2026}").into_owned())
            .collect();

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("serial.select_prompt").to_string())
            .items(&labels)
            .default(0)
            .interact_opt()
            .map_err(prompt_error)?;

        match selection {
            Some(index) => ports
                .into_iter()
                .nth(index)
                .ok_or(espflow::Error::DeviceNotSelected),
            None => not_selected(&t!("serial.selection_cancelled")),
        }
    }

    /// Confirm use of a single port.
    fn confirm_single(&self, port: DetectedPort) -> espflow::Result<DetectedPort> {
        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(
                t!("serial.confirm_use", port = port.name.clone(), info = product_info).to_string(),
            )
            .default(true)
            .interact_opt()
            .map_err(prompt_error)?
            .unwrap_or(false);

        if confirmed {
            Ok(port)
        } else {
            not_selected(&t!("serial.selection_cancelled"))
        }
    }
}

impl PortPicker for DialoguerPicker {
    fn pick(&self, ports: &[DetectedPort]) -> espflow::Result<DetectedPort> {
        if let Some(name) = &self.options.port {
            return Ok(find_port_by_name(ports, name));
        }

        if ports.is_empty() {
            return not_selected(&t!("serial.no_ports_found"));
        }

        let known: Vec<DetectedPort> = ports.iter().filter(|p| self.is_known(p)).cloned().collect();
        let candidates = if self.options.list_all_ports || known.is_empty() {
            ports.to_vec()
        } else {
            known
        };

        if self.options.non_interactive {
            return self.select_non_interactive(candidates);
        }

        match candidates.len().cmp(&1) {
            Ordering::Greater => {
                ensure_interactive_terminal()?;
                self.select_interactive(candidates)
            },
            Ordering::Equal => {
                let port = candidates
                    .into_iter()
                    .next()
                    .ok_or(espflow::Error::DeviceNotSelected)?;
                if self.is_known(&port) && !self.options.confirm_port {
                    info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                    Ok(port)
                } else {
                    ensure_interactive_terminal()?;
                    self.confirm_single(port)
                }
            },
            Ordering::Less => not_selected(&t!("serial.no_ports_available")),
        }
    }
}

/// Log why nothing was selected, then fail the pick.
fn not_selected<T>(reason: &str) -> espflow::Result<T> {
    warn!("{reason}");
    Err(espflow::Error::DeviceNotSelected)
}

fn ensure_interactive_terminal() -> espflow::Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        not_selected(&t!("serial.interactive_requires_tty"))
    }
}

fn prompt_error(err: dialoguer::Error) -> espflow::Error {
    let dialoguer::Error::IO(io_err) = err;
    debug!("Prompt failed: {io_err}");
    if io_err.kind() != std::io::ErrorKind::Interrupted {
        warn!("{}", t!("serial.prompt_failed"));
    }
    espflow::Error::DeviceNotSelected
}

/// Find a port by name in the discovered list, or trust the user's name.
fn find_port_by_name(ports: &[DetectedPort], name: &str) -> DetectedPort {
    ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
        .cloned()
        .unwrap_or_else(|| DetectedPort::named(name))
}

/// One picker line: name, device kind or VID:PID, product.
fn port_label(port: &DetectedPort, known: bool) -> String {
    let name = if known {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Offer to remember the USB device behind `port_name` after a connect.
///
/// Skipped for built-in bridges and devices already remembered.
pub fn ask_remember_port(port_name: &str, config: &mut Config) -> Result<()> {
    let Some(port) = detect_ports().into_iter().find(|p| p.name == port_name) else {
        return Ok(());
    };
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if port.device.is_known() || config.is_remembered(vid, pid) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.remember_prompt").to_string())
        .default(false)
        .interact_opt()?
        .unwrap_or(false);

    if confirmed {
        match config.remember_usb_device(vid, pid) {
            Ok(path) => eprintln!(
                "{} {}",
                style("✓").green(),
                t!("serial.remembered", path = path.display().to_string())
            ),
            Err(e) => error!("Failed to save port configuration: {e}"),
        }
    }

    Ok(())
}
