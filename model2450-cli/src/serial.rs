//! Interactive serial port selection.
//!
//! Picks the sensor's normal-mode port:
//! - Explicit `--port` / `MODEL2450_PORT`, then the configured port
//! - Auto-detection by USB VID/PID
//! - Interactive selection via dialoguer when several sensors are attached
//! - Non-interactive mode for scripts

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    model2450::{DetectedPort, DeviceMode, NativeBus, discovery, format_port_list},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

/// Result of port selection.
#[derive(Debug)]
pub struct SelectedPort {
    /// Port name.
    pub name: String,
    /// Whether the port was picked from detection rather than given.
    pub detected: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Sensor ports, normal mode first.
fn sensor_candidates(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    let mut sensors: Vec<DetectedPort> = ports
        .into_iter()
        .filter(DetectedPort::is_sensor)
        .collect();
    sensors.sort_by_key(|p| p.mode != Some(DeviceMode::Normal));
    sensors
}

/// Pick without prompting: exactly one sensor is required.
fn select_non_interactive(candidates: Vec<DetectedPort>) -> Result<DetectedPort> {
    let mut candidates = candidates.into_iter();
    match (candidates.next(), candidates.next()) {
        (None, _) => Err(model2450::Error::DeviceNotFound.into()),
        (Some(port), None) => Ok(port),
        (Some(_), Some(_)) => Err(usage_err(
            "multiple sensors detected; pass --port to choose one",
        )),
    }
}

/// Select the sensor's serial port.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(SelectedPort {
            name: port_name.clone(),
            detected: false,
        });
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(SelectedPort {
            name: port_name.clone(),
            detected: false,
        });
    }

    let candidates = sensor_candidates(discovery::detect_ports(&NativeBus, &config.identity())?);

    let port = if options.non_interactive || candidates.len() <= 1 {
        select_non_interactive(candidates)?
    } else {
        ensure_interactive_terminal()?;
        select_port_interactive(candidates)?
    };

    info!(
        "Selected port: {} [{}]",
        port.info.name,
        port.mode.map_or("unknown", |m| m.name())
    );
    Ok(SelectedPort {
        name: port.info.name,
        detected: true,
    })
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "multiple sensors detected and no terminal to prompt on; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("port selection cancelled".to_string()).into()
            } else {
                usage_err(&format!("prompt failed: {io_err}"))
            }
        },
    }
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} Several sensors are connected, pick one:",
        style("ℹ").blue()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_port_list(&ports)
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}

/// Offer to remember an auto-detected port.
pub fn ask_remember_port(port: &str, config: &mut Config) -> Result<()> {
    if ensure_interactive_terminal().is_err() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} for next time?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.save_port(port) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model2450::PortInfo;

    fn port(name: &str, mode: Option<DeviceMode>) -> DetectedPort {
        DetectedPort {
            info: PortInfo {
                name: name.to_string(),
                ..Default::default()
            },
            revision: None,
            mode,
        }
    }

    #[test]
    fn test_candidates_keep_sensors_normal_first() {
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyACM1", Some(DeviceMode::Bootloader)),
            port("/dev/ttyACM0", Some(DeviceMode::Normal)),
        ];
        let names: Vec<String> = sensor_candidates(ports)
            .into_iter()
            .map(|p| p.info.name)
            .collect();
        assert_eq!(names, ["/dev/ttyACM0", "/dev/ttyACM1"]);
    }

    #[test]
    fn test_non_interactive_single() {
        let chosen = select_non_interactive(vec![port("COM5", Some(DeviceMode::Normal))]).unwrap();
        assert_eq!(chosen.info.name, "COM5");
    }

    #[test]
    fn test_non_interactive_none_is_not_found() {
        let err = select_non_interactive(Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<model2450::Error>(),
            Some(model2450::Error::DeviceNotFound)
        ));
    }

    #[test]
    fn test_non_interactive_multiple_is_usage_error() {
        let err = select_non_interactive(vec![
            port("COM5", Some(DeviceMode::Normal)),
            port("COM6", Some(DeviceMode::Normal)),
        ])
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());
        let options = SerialOptions {
            port: Some("COM9".to_string()),
            ..Default::default()
        };
        let selected = select_serial_port(&options, &config).unwrap();
        assert_eq!(selected.name, "COM9");
        assert!(!selected.detected);
    }

    #[test]
    fn test_configured_port_used() {
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());
        let selected = select_serial_port(&SerialOptions::default(), &config).unwrap();
        assert_eq!(selected.name, "COM3");
    }
}
