//! # model2450
//!
//! Firmware update engine and telemetry codec for the Model2450
//! brightness/color sensor.
//!
//! The sensor is an ATmega32U4 board running a Caterina (AVR109) bootloader.
//! This crate provides:
//!
//! - Intel HEX image loading ([`image`])
//! - The bootloader update state machine ([`updater`])
//! - Bootloader port discovery via reset and re-enumeration ([`discovery`])
//! - The binary telemetry frame codec ([`protocol::packet`]) and a
//!   normal-mode command session ([`telemetry`])
//!
//! ## Features
//!
//! - `native` (default): `serialport` ports and `nusb` USB descriptors
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use model2450::discovery::{self, DiscoveryConfig, NativeBus};
//! use model2450::{FirmwareUpdater, FlashImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FlashImage::from_file("sensor.hex")?;
//!
//!     let found = discovery::detect_bootloader_mode(
//!         &NativeBus,
//!         "/dev/ttyACM0",
//!         &DiscoveryConfig::default(),
//!     )?;
//!
//!     let report = FirmwareUpdater::new(NativeBus, &image, found.port)?
//!         .with_log_sink(|line: &str| println!("{line}"))
//!         .with_progress_sink(|pct: u8| println!("{pct}%"))
//!         .run()?;
//!
//!     println!("Signature: {}", report.info.signature_hex());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod discovery;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod telemetry;
pub mod transport;
pub mod updater;

#[cfg(test)]
mod testing;

#[cfg(feature = "native")]
pub use discovery::NativeBus;
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceIdentity, DeviceMode, format_port_list},
    discovery::{BootloaderPort, DeviceBus, DiscoveryConfig, detect_bootloader_mode},
    error::{Error, Result},
    image::{FlashImage, HexStats},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::packet::{DecodeError, Reassembler, TelemetryPacket},
    telemetry::{DeviceCommand, StreamRecord, TelemetrySession},
    transport::Transport,
    updater::{
        BootloaderSession, CancelToken, DeviceInfo, FirmwareUpdater, LogSink, ProgressSink,
        UpdateReport, UpdateState, UpdaterConfig,
    },
};
