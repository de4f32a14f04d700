//! Locating the sensor and its bootloader port.
//!
//! Entering the bootloader makes the sensor drop off the bus and come back
//! as a new USB CDC device, often under a different port name. Discovery
//! snapshots the matching ports, asks the application firmware to reset
//! into the bootloader and diffs the port list once the device has
//! re-enumerated.
//!
//! All host access goes through [`DeviceBus`] so the flow can be exercised
//! without hardware.

#[cfg(feature = "native")]
pub mod native;

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{DetectedPort, DeviceIdentity, DeviceMode};
use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialConfig};
use crate::telemetry::DeviceCommand;

#[cfg(feature = "native")]
pub use native::NativeBus;

/// Time allowed for the device to re-enumerate after a reset.
pub const REENUMERATE_WAIT: Duration = Duration::from_secs(3);

/// Pause before retrying a reset that produced no new port.
pub const RETRY_WAIT: Duration = Duration::from_secs(1);

/// Reset attempts before giving up.
pub const MAX_RESET_ATTEMPTS: u32 = 2;

/// Host-side access to serial ports and USB descriptors.
pub trait DeviceBus {
    /// Port type produced by [`open`](Self::open).
    type Port: Port;

    /// Enumerate serial ports.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// USB `bcdDevice` of the device behind `port`, if it can be read.
    fn revision(&self, port: &PortInfo) -> Result<Option<u16>>;

    /// Open a port.
    fn open(&self, config: &SerialConfig) -> Result<Self::Port>;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    /// Send the reset command on `config.port_name`.
    ///
    /// The command is written twice; the first copy may be swallowed by a
    /// partially read line on the device.
    fn send_reset(&self, config: &SerialConfig) -> Result<()> {
        let line = DeviceCommand::ResetToBootloader.to_line();
        let mut port = self.open(config)?;
        port.write_all_bytes(line.as_bytes())?;
        port.write_all_bytes(line.as_bytes())?;
        port.close()
    }
}

impl<B: DeviceBus + ?Sized> DeviceBus for &B {
    type Port = B::Port;

    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        (**self).list_ports()
    }

    fn revision(&self, port: &PortInfo) -> Result<Option<u16>> {
        (**self).revision(port)
    }

    fn open(&self, config: &SerialConfig) -> Result<Self::Port> {
        (**self).open(config)
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }

    fn send_reset(&self, config: &SerialConfig) -> Result<()> {
        (**self).send_reset(config)
    }
}

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Device identity and known revisions.
    pub identity: DeviceIdentity,
    /// Serial settings used for the reset command.
    pub serial: SerialConfig,
    /// Wait after each reset for re-enumeration.
    pub reenumerate_wait: Duration,
    /// Wait before the next attempt when no port appeared.
    pub retry_wait: Duration,
    /// Reset attempts.
    pub max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::default(),
            serial: SerialConfig::default(),
            reenumerate_wait: REENUMERATE_WAIT,
            retry_wait: RETRY_WAIT,
            max_attempts: MAX_RESET_ATTEMPTS,
        }
    }
}

impl DiscoveryConfig {
    /// Use a different device identity.
    #[must_use]
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Use a different baud rate for the reset command.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.serial.baud_rate = baud_rate;
        self
    }
}

/// Where the bootloader was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderPort {
    /// Port name.
    pub port: String,
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// USB `bcdDevice`, if it could be read.
    pub revision: Option<u16>,
    /// Whether a reset was needed to get there.
    pub reset: bool,
}

/// Names of ports matching `vid`/`pid`, in enumeration order.
pub fn find_candidate_ports<B: DeviceBus>(bus: &B, vid: u16, pid: u16) -> Result<Vec<String>> {
    Ok(bus
        .list_ports()?
        .into_iter()
        .filter(|p| p.matches(vid, pid))
        .map(|p| p.name)
        .collect())
}

/// Enumerate every port and classify the sensor's ones.
pub fn detect_ports<B: DeviceBus>(bus: &B, identity: &DeviceIdentity) -> Result<Vec<DetectedPort>> {
    let ports = bus.list_ports()?;

    Ok(ports
        .into_iter()
        .map(|info| {
            if !identity.matches(&info) {
                return DetectedPort {
                    info,
                    revision: None,
                    mode: None,
                };
            }

            let revision = bus
                .revision(&info)
                .unwrap_or_else(|e| {
                    debug!("Could not read USB revision for {}: {e}", info.name);
                    None
                });
            let mode = identity.classify(revision);
            DetectedPort {
                info,
                revision,
                mode: Some(mode),
            }
        })
        .collect())
}

/// Find the bootloader port, resetting the device through `normal_port` if
/// it is not already in bootloader mode.
///
/// Fails with [`Error::PortBusy`] if another program holds `normal_port`,
/// and with [`Error::BootloaderNotFound`] once the attempts are used up.
pub fn detect_bootloader_mode<B: DeviceBus>(
    bus: &B,
    normal_port: &str,
    config: &DiscoveryConfig,
) -> Result<BootloaderPort> {
    let identity = &config.identity;

    if let Some(found) = already_in_bootloader(bus, normal_port, identity)? {
        return Ok(found);
    }

    let reset_config = config
        .serial
        .clone()
        .with_port(normal_port);

    for attempt in 1..=config.max_attempts {
        info!("Bootloader detection attempt {attempt} on {normal_port}");

        let before: HashSet<String> = find_candidate_ports(bus, identity.vid, identity.pid)?
            .into_iter()
            .collect();

        match bus.send_reset(&reset_config) {
            Ok(()) => debug!("Reset command sent to {normal_port}"),
            Err(e @ Error::PortBusy { .. }) => return Err(e),
            Err(e) => warn!("Failed to send reset to {normal_port}: {e}"),
        }

        bus.sleep(config.reenumerate_wait);

        let appeared = bus
            .list_ports()?
            .into_iter()
            .find(|p| identity.matches(p) && !before.contains(&p.name));

        if let Some(info) = appeared {
            let revision = bus
                .revision(&info)
                .unwrap_or(None);
            info!(
                "Bootloader port {} (VID {:04X}, PID {:04X})",
                info.name, identity.vid, identity.pid
            );
            return Ok(BootloaderPort {
                port: info.name,
                vid: identity.vid,
                pid: identity.pid,
                revision,
                reset: true,
            });
        }

        if attempt < config.max_attempts {
            warn!("Bootloader not detected, retrying");
            bus.sleep(config.retry_wait);
        }
    }

    Err(Error::BootloaderNotFound {
        attempts: config.max_attempts,
    })
}

fn already_in_bootloader<B: DeviceBus>(
    bus: &B,
    port: &str,
    identity: &DeviceIdentity,
) -> Result<Option<BootloaderPort>> {
    let Some(info) = bus
        .list_ports()?
        .into_iter()
        .find(|p| p.name == port)
    else {
        debug!("{port} is not currently enumerated");
        return Ok(None);
    };

    let (Some(vid), Some(pid)) = (info.vid, info.pid) else {
        return Ok(None);
    };

    let revision = bus
        .revision(&info)
        .unwrap_or(None);
    if identity.classify(revision) != DeviceMode::Bootloader {
        return Ok(None);
    }

    info!("{port} is already in bootloader mode (VID {vid:04X}, PID {pid:04X})");
    Ok(Some(BootloaderPort {
        port: info.name,
        vid,
        pid,
        revision,
        reset: false,
    }))
}
