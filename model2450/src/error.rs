//! Error types for model2450.

use std::io;
use thiserror::Error;

use crate::protocol::packet::DecodeError;
use crate::updater::UpdateState;

/// Result type for model2450 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for model2450 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port is held exclusively by another process.
    #[error(
        "Port {port} is already open in another program. Close it (e.g. a terminal emulator) and try again"
    )]
    PortBusy {
        /// Port name/path.
        port: String,
    },

    /// Hex file failed the structural check or carries no data.
    #[error("Invalid hex file: {0}")]
    InvalidHex(String),

    /// Telemetry frame could not be decoded.
    #[error("Packet decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The bootloader answered a step with something unexpected (or nothing).
    #[error("Protocol error in {state}: {message}")]
    Protocol {
        /// Step that failed.
        state: UpdateState,
        /// Human-readable description.
        message: String,
    },

    /// No matching device was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// The bootloader port did not appear after resetting the device.
    #[error("Bootloader port not detected after {attempts} attempts")]
    BootloaderNotFound {
        /// Number of reset attempts made.
        attempts: u32,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a protocol error for the given step.
    pub fn protocol(state: UpdateState, message: impl Into<String>) -> Self {
        Self::Protocol {
            state,
            message: message.into(),
        }
    }

    /// Whether the error means another process holds the port.
    pub fn is_port_busy(&self) -> bool {
        matches!(self, Self::PortBusy { .. })
    }
}
