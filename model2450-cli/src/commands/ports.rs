//! Port listing command.

use {
    anyhow::Result,
    console::style,
    model2450::{DetectedPort, DeviceMode, NativeBus, discovery},
};

use crate::config::Config;

fn mode_label(mode: Option<DeviceMode>) -> String {
    match mode {
        Some(DeviceMode::Bootloader) => style("bootloader").yellow().to_string(),
        Some(DeviceMode::Normal) => style("normal").green().to_string(),
        Some(DeviceMode::Unknown) => style("unknown mode").dim().to_string(),
        None => String::new(),
    }
}

fn print_port(port: &DetectedPort) {
    let vid_pid = match (port.info.vid, port.info.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let sensor = if port.is_sensor() {
        let rev = port
            .revision
            .map(|r| format!(" rev {r:04X}"))
            .unwrap_or_default();
        format!(" [Model2450 {}{rev}]", mode_label(port.mode))
    } else {
        String::new()
    };
    let product = port.info.description();
    let product = if product.is_empty() || product == port.info.name {
        String::new()
    } else {
        format!(" - {}", style(product).dim())
    };

    eprintln!(
        "  {} {}{sensor}{vid_pid}{product}",
        style("•").green(),
        style(&port.info.name).cyan(),
    );
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) -> Result<()> {
    let detected = discovery::detect_ports(&NativeBus, &config.identity())?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": detected,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        print_port(port);
    }

    if !detected.iter().any(DetectedPort::is_sensor) {
        eprintln!("\n  {}", style("No Model2450 sensor detected").dim());
    }

    Ok(())
}
