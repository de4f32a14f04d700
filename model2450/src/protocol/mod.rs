//! Wire protocols spoken by the sensor.
//!
//! - [`packet`]: binary telemetry frames used in normal mode.
//! - [`bootloader`]: Caterina/AVR109 commands used in bootloader mode.

pub mod bootloader;
pub mod packet;

pub use packet::{DecodeError, Reassembler, TelemetryPacket, decode_header, read_frame, reassemble};
