//! model2450 CLI - Command-line tool for the Model2450 brightness/color sensor.
//!
//! ## Features
//!
//! - Update firmware from an Intel HEX file through the Caterina bootloader
//! - Inspect HEX images before flashing
//! - List serial ports and classify the sensor's mode
//! - Send device commands and capture block/stream telemetry
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use model2450::CancelToken;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// model2450 - update and monitor the Model2450 brightness/color sensor.
///
/// Environment variables:
///   MODEL2450_PORT              - Default serial port
///   MODEL2450_BAUD              - Default baud rate (default: 115200)
///   MODEL2450_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "model2450")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port of the sensor in normal mode (auto-detected if not specified).
    #[arg(short, long, global = true, env = "MODEL2450_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "MODEL2450_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "MODEL2450_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Update the sensor firmware from an Intel HEX file.
    Update {
        /// Path to the HEX file.
        hex: PathBuf,

        /// Do not query the firmware version after the update.
        #[arg(long)]
        skip_version_check: bool,
    },

    /// Show information about a HEX file.
    HexInfo {
        /// Path to the HEX file.
        hex: PathBuf,

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

    /// Send a command (run, stop, status, version, packets, stream N) and print the reply.
    Send {
        /// Command words, e.g. `status` or `stream 3`.
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Stream color/light samples.
    Stream {
        /// Stream level sent to the device.
        #[arg(long, default_value_t = model2450::telemetry::DEFAULT_STREAM_LEVEL)]
        level: u8,

        /// Capture duration in seconds.
        #[arg(long, default_value_t = 10)]
        duration: u64,

        /// Print samples as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Capture block frames (`run` ... `stop`).
    Blocks {
        /// Capture duration in seconds.
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Failures that map onto dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an environment that cannot satisfy it.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// Aborted by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for a failed command.
///
/// 1 generic, 2 usage, 3 configuration, 4 device not found, 5 port busy,
/// 130 cancelled.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }

    match err.downcast_ref::<model2450::Error>() {
        Some(model2450::Error::Config(_)) => 3,
        Some(model2450::Error::DeviceNotFound | model2450::Error::BootloaderNotFound { .. }) => 4,
        Some(model2450::Error::PortBusy { .. }) => 5,
        Some(model2450::Error::Cancelled) => 130,
        _ => 1,
    }
}

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

/// Cancellation token tripped by Ctrl-C.
fn install_cancel_handler() -> CancelToken {
    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not install Ctrl-C handler: {e}");
    }
    token
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "model2450 v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update {
            hex,
            skip_version_check,
        } => {
            let cancel = install_cancel_handler();
            commands::update::cmd_update(cli, &mut config, hex, *skip_version_check, &cancel)
        },
        Commands::HexInfo { hex, json } => commands::hex_info::cmd_hex_info(hex, *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(&config, *json),
        Commands::Send { command } => commands::telemetry::cmd_send(cli, &config, command),
        Commands::Stream {
            level,
            duration,
            json,
        } => {
            let cancel = install_cancel_handler();
            commands::telemetry::cmd_stream(cli, &config, *level, *duration, *json, &cancel)
        },
        Commands::Blocks { duration } => {
            let cancel = install_cancel_handler();
            commands::telemetry::cmd_blocks(cli, &config, *duration, &cancel)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

impl Cli {
    /// Baud rate from flag/env, then config, then the sensor default.
    pub(crate) fn baud_rate(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(model2450::port::DEFAULT_BAUD)
    }
}
