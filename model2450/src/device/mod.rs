//! Model2450 identity and port classification.
//!
//! The sensor enumerates as a USB CDC serial device with a fixed VID/PID in
//! both normal and bootloader mode. The two modes are told apart by the USB
//! `bcdDevice` revision.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::port::PortInfo;

/// USB vendor ID of the sensor.
pub const DEVICE_VID: u16 = 0x045E;

/// USB product ID of the sensor.
pub const DEVICE_PID: u16 = 0x0646;

/// `bcdDevice` revisions reported while the bootloader is running.
pub const BOOTLOADER_REVISIONS: &[u16] = &[0x0011, 0x0004];

/// `bcdDevice` revisions reported by the application firmware.
pub const NORMAL_REVISIONS: &[u16] = &[0x0005];

/// Operating mode inferred from the USB revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceMode {
    /// Caterina bootloader is active.
    Bootloader,
    /// Application firmware is running.
    Normal,
    /// Revision unknown or unavailable.
    Unknown,
}

impl DeviceMode {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader",
            Self::Normal => "normal",
            Self::Unknown => "unknown",
        }
    }
}

/// USB identity used to recognise the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Vendor ID.
    pub vid: u16,
    /// Product ID.
    pub pid: u16,
    /// Revisions meaning bootloader mode.
    pub bootloader_revisions: Vec<u16>,
    /// Revisions meaning normal mode.
    pub normal_revisions: Vec<u16>,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vid: DEVICE_VID,
            pid: DEVICE_PID,
            bootloader_revisions: BOOTLOADER_REVISIONS.to_vec(),
            normal_revisions: NORMAL_REVISIONS.to_vec(),
        }
    }
}

impl DeviceIdentity {
    /// Whether `port` belongs to this device.
    pub fn matches(&self, port: &PortInfo) -> bool {
        port.matches(self.vid, self.pid)
    }

    /// Classify a `bcdDevice` revision.
    pub fn classify(&self, revision: Option<u16>) -> DeviceMode {
        match revision {
            Some(rev) if self.bootloader_revisions.contains(&rev) => DeviceMode::Bootloader,
            Some(rev) if self.normal_revisions.contains(&rev) => DeviceMode::Normal,
            _ => DeviceMode::Unknown,
        }
    }
}

/// A serial port annotated with the sensor's mode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectedPort {
    /// Port metadata.
    pub info: PortInfo,
    /// USB `bcdDevice`, when the port belongs to the sensor and it could be read.
    pub revision: Option<u16>,
    /// Mode inferred from the revision; `None` for ports that are not the sensor.
    pub mode: Option<DeviceMode>,
}

impl DetectedPort {
    /// Whether the port belongs to the sensor.
    pub fn is_sensor(&self) -> bool {
        self.mode.is_some()
    }
}

/// Format detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let usb = match (port.info.vid, port.info.pid) {
                (Some(vid), Some(pid)) => format!(" [VID:{vid:04X} PID:{pid:04X}]"),
                _ => String::new(),
            };

            let mode = match (port.mode, port.revision) {
                (Some(mode), Some(rev)) => format!(" Model2450 {} (rev {rev:04X})", mode.name()),
                (Some(mode), None) => format!(" Model2450 {}", mode.name()),
                _ => String::new(),
            };

            let product = port
                .info
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{usb}{mode}{product}", port.info.name)
        })
        .collect()
}
