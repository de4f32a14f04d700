//! Normal-mode commands: send, stream and block capture.

use {
    anyhow::{Context, Result},
    console::style,
    log::info,
    model2450::{
        CancelToken, DeviceCommand, NativePort, SerialConfig, StreamRecord, TelemetrySession,
    },
    std::time::Duration,
};

use crate::config::Config;
use crate::serial::{SerialOptions, select_serial_port};
use crate::{Cli, CliError};

/// Parse command words such as `["stream", "3"]`.
fn parse_command(words: &[String]) -> Result<DeviceCommand> {
    words
        .join(" ")
        .parse::<DeviceCommand>()
        .map_err(|e| CliError::Usage(e.to_string()).into())
}

/// Whether the device answers `command` with text lines.
fn replies_with_lines(command: DeviceCommand) -> bool {
    matches!(
        command,
        DeviceCommand::Status | DeviceCommand::Version | DeviceCommand::Packets
    )
}

fn format_record(record: StreamRecord) -> String {
    match record {
        StreamRecord::Color { r, g, b } => format!("R:{r:3} G:{g:3} B:{b:3}"),
        StreamRecord::Light(level) => format!("light {level}"),
    }
}

fn open_session(cli: &Cli, config: &Config) -> Result<TelemetrySession<NativePort>> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let selected = select_serial_port(&options, config)?;
    let serial = SerialConfig::new(selected.name.clone(), cli.baud_rate(config));
    TelemetrySession::open(&serial).with_context(|| format!("Failed to open {}", selected.name))
}

/// Send command implementation.
pub(crate) fn cmd_send(cli: &Cli, config: &Config, words: &[String]) -> Result<()> {
    let command = parse_command(words)?;
    let mut session = open_session(cli, config)?;

    if replies_with_lines(command) {
        let lines = session.query(command)?;
        if lines.is_empty() && !cli.quiet {
            eprintln!("{} No reply to `{command}`", style("!").yellow().bold());
        }
        for line in lines {
            println!("{line}");
        }
    } else {
        session.send(command)?;
        info!("Sent `{command}`");
    }

    session.close()?;
    Ok(())
}

/// Stream command implementation.
pub(crate) fn cmd_stream(
    cli: &Cli,
    config: &Config,
    level: u8,
    duration: u64,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let mut session = open_session(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Streaming level {level} for {duration}s (Ctrl-C to stop)",
            style("📡").cyan()
        );
    }

    let mut write_error = None;
    let samples = session.capture_stream(
        level,
        Duration::from_secs(duration),
        cancel,
        |record| {
            if json {
                match serde_json::to_string(&record) {
                    Ok(line) => println!("{line}"),
                    Err(e) => write_error = Some(e),
                }
            } else {
                println!("{}", format_record(record));
            }
        },
    )?;
    session.close()?;

    if let Some(e) = write_error {
        return Err(e.into());
    }
    if !cli.quiet {
        eprintln!("{} {samples} samples", style("✓").green().bold());
    }
    Ok(())
}

/// Blocks command implementation.
pub(crate) fn cmd_blocks(
    cli: &Cli,
    config: &Config,
    duration: u64,
    cancel: &CancelToken,
) -> Result<()> {
    let mut session = open_session(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Capturing block frames for {duration}s (Ctrl-C to stop)",
            style("📡").cyan()
        );
    }

    let summary = session.capture_blocks(Duration::from_secs(duration), cancel, |message| {
        println!("{message}");
    })?;
    session.close()?;

    if !cli.quiet {
        eprintln!(
            "{} {} messages from {} frames ({} undecodable)",
            style("✓").green().bold(),
            summary.messages,
            summary.frames,
            summary.decode_errors
        );
    }
    Ok(())
}
