//! Firmware info and port listing command implementations.

use {
    crate::{commands::firmware::human_size, config::Config},
    anyhow::Result,
    console::style,
    espflow::{DetectedPort, FirmwareSource, ImageHeader, auto_detect_port, detect_ports},
    rust_i18n::t,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) -> Result<()> {
    let detected = detect_ports();
    let is_known = |p: &DetectedPort| {
        p.device.is_known()
            || matches!((p.vid, p.pid), (Some(vid), Some(pid)) if config.is_remembered(vid, pid))
    };

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "device": p.device.name(),
                    "known": is_known(p),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style(t!("list_ports.header")).bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else if is_known(port) {
            format!(" [{}]", style(t!("list_ports.remembered")).yellow())
        } else {
            String::new()
        };

        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };

        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} {}",
            style("→").green().bold(),
            t!(
                "list_ports.auto_detected",
                port = style(&auto_port.name).cyan().bold().to_string()
            )
        );
    }

    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &str, json: bool) -> Result<()> {
    let source = FirmwareSource::from_arg(firmware);

    if !json {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("flash.loading_firmware", path = source.to_string())
        );
    }

    let image = source.load(0)?;
    let header = image.header();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "source": source.to_string(),
                "size": image.len(),
                "header": header.as_ref().map(header_json),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("\n{}", style(t!("info.header")).bold().underlined());
    eprintln!(
        "  {}",
        t!("info.size", size = human_size(image.len() as u64), bytes = image.len())
    );

    let Some(header) = header else {
        eprintln!("  {}", style(t!("info.no_header")).yellow());
        return Ok(());
    };

    eprintln!("  {}: {}", t!("info.chip"), style(header.chip).cyan().bold());
    eprintln!("  {}: {}", t!("info.segments"), header.segment_count);
    eprintln!("  {}: 0x{:08X}", t!("info.entry_point"), header.entry_point);
    eprintln!("  {}: {}", t!("info.flash_mode"), header.flash_mode);
    eprintln!("  {}: {}", t!("info.flash_size"), header.flash_size_label());
    eprintln!(
        "  {}: {} - {}",
        t!("info.revision"),
        ImageHeader::format_revision(header.min_revision),
        ImageHeader::format_revision(header.max_revision)
    );
    eprintln!(
        "  {}: {}",
        t!("info.hash_appended"),
        if header.hash_appended {
            t!("info.yes")
        } else {
            t!("info.no")
        }
    );

    Ok(())
}

/// Header fields as plain JSON (no ANSI colors).
fn header_json(header: &ImageHeader) -> serde_json::Value {
    serde_json::json!({
        "chip": header.chip.to_string(),
        "segments": header.segment_count,
        "entry_point": format!("0x{:08X}", header.entry_point),
        "flash_mode": header.flash_mode.to_string(),
        "flash_size": header.flash_size_label(),
        "min_revision": ImageHeader::format_revision(header.min_revision),
        "max_revision": ImageHeader::format_revision(header.max_revision),
        "hash_appended": header.hash_appended,
    })
}
