//! Firmware update command.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use model2450::discovery::{self, DiscoveryConfig};
use model2450::{
    CancelToken, FirmwareUpdater, FlashImage, NativeBus, SerialConfig, TelemetrySession,
    UpdateReport, UpdaterConfig,
};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::serial::{SerialOptions, ask_remember_port, select_serial_port};
use crate::{Cli, use_fancy_output};

/// Time the application firmware needs to boot after leaving the bootloader.
const REBOOT_WAIT: Duration = Duration::from_secs(2);

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
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

/// Print the image summary before flashing.
fn print_image(image: &FlashImage, path: &Path) {
    let stats = image.stats();
    eprintln!(
        "{} {} ({} bytes, {} data records)",
        style("📦").cyan(),
        path.display(),
        image.len(),
        stats.data_records
    );
    if let (Some(min), Some(max)) = (image.min_address(), image.max_address()) {
        eprintln!(
            "    {} range 0x{min:04X}..=0x{max:04X}",
            style("•").dim()
        );
    }
}

fn print_report(report: &UpdateReport) {
    let info = &report.info;
    eprintln!(
        "{} Firmware written through {} ({} blocks, {:.1}s)",
        style("✓").green().bold(),
        report.port,
        report.blocks_written,
        report.elapsed.as_secs_f64()
    );
    eprintln!(
        "    {} {} {} version {}",
        style("•").dim(),
        info.programmer_id,
        info.programmer_type,
        info.version_string()
    );
    eprintln!("    {} signature {}", style("•").dim(), info.signature_hex());
    eprintln!(
        "    {} fuses before: {}",
        style("•").dim(),
        info.fuses_before
    );
    eprintln!("    {} fuses after:  {}", style("•").dim(), info.fuses_after);
}

/// Ask the rebooted application for its version.
fn check_version(port: &str, baud: u32) {
    thread::sleep(REBOOT_WAIT);

    let result = TelemetrySession::open(&SerialConfig::new(port, baud)).and_then(|mut session| {
        let version = session.version();
        session.close()?;
        version
    });

    match result {
        Ok(Some(version)) => info!("Device reports version: {version}"),
        Ok(None) => warn!("No version reply from {port}; the device may still be rebooting"),
        Err(e) => warn!("Could not query version on {port}: {e}"),
    }
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &mut Config,
    hex: &Path,
    skip_version_check: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let image = FlashImage::from_file(hex)
        .with_context(|| format!("Failed to load {}", hex.display()))?;
    if !cli.quiet {
        print_image(&image, hex);
    }

    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let selected = select_serial_port(&options, config)?;
    if !cli.quiet {
        eprintln!("{} Using port {}", style("🔌").cyan(), selected.name);
    }

    let baud = cli.baud_rate(config);
    let identity = config.identity();
    let discovery_config = DiscoveryConfig::default()
        .with_identity(identity.clone())
        .with_baud_rate(baud);

    if cancel.is_cancelled() {
        return Err(model2450::Error::Cancelled.into());
    }
    let found = discovery::detect_bootloader_mode(&NativeBus, &selected.name, &discovery_config)?;
    if found.reset {
        info!("Device reset into bootloader on {}", found.port);
    }

    let updater_config = UpdaterConfig {
        serial: SerialConfig::new(found.port.clone(), baud),
        identity,
        ..Default::default()
    };

    let pb = progress_bar(cli.quiet);
    let log_pb = pb.clone();
    let progress_pb = pb.clone();

    let outcome = FirmwareUpdater::new(NativeBus, &image, found.port.clone())?
        .with_config(updater_config)
        .with_log_sink(move |line: &str| log_pb.set_message(line.to_string()))
        .with_progress_sink(move |pct: u8| progress_pb.set_position(u64::from(pct)))
        .with_cancel_token(cancel.clone())
        .run();

    let report = match outcome {
        Ok(report) => {
            pb.finish_and_clear();
            report
        },
        Err(e) => {
            pb.abandon();
            return Err(e).context("Firmware update failed");
        },
    };

    if !cli.quiet {
        print_report(&report);
    }

    if !skip_version_check {
        check_version(&selected.name, baud);
    }

    if selected.detected && !cli.non_interactive && config.connection.serial.is_none() {
        ask_remember_port(&selected.name, config)?;
    }

    Ok(())
}
