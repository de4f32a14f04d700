//! Host bus backed by `serialport` enumeration and `nusb` descriptors.

use log::{debug, trace};
use nusb::MaybeFuture;

use crate::discovery::DeviceBus;
use crate::error::{Error, Result};
use crate::port::{NativePort, NativePortEnumerator, PortEnumerator, PortInfo, SerialConfig};

/// The local machine's serial ports and USB devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBus;

impl DeviceBus for NativeBus {
    type Port = NativePort;

    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = NativePortEnumerator::list_ports()?;
        trace!("Enumerated {} serial ports", ports.len());
        Ok(ports)
    }

    /// Reads `bcdDevice` of the USB device with the port's VID/PID,
    /// preferring the one whose serial number matches.
    fn revision(&self, port: &PortInfo) -> Result<Option<u16>> {
        let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
            return Ok(None);
        };

        let devices: Vec<nusb::DeviceInfo> = nusb::list_devices()
            .wait()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
            .filter(|d| d.vendor_id() == vid && d.product_id() == pid)
            .collect();

        let device = port
            .serial_number
            .as_deref()
            .and_then(|serial| {
                devices
                    .iter()
                    .find(|d| d.serial_number() == Some(serial))
            })
            .or_else(|| devices.first());

        let revision = device.map(nusb::DeviceInfo::device_version);
        debug!(
            "USB revision for {} ({vid:04X}:{pid:04X}): {:04X?}",
            port.name, revision
        );
        Ok(revision)
    }

    fn open(&self, config: &SerialConfig) -> Result<Self::Port> {
        NativePort::open(config)
    }
}
