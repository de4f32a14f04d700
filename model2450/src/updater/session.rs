//! Mutable state of one update run.

use std::fmt;

use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::protocol::bootloader::{ADDRESS_STEP, BLOCK_SIZE};
use crate::updater::UpdateState;

/// Position and mode of a running update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderSession {
    /// Current step.
    pub state: UpdateState,
    /// Port in use; switches to the bootloader port once it is selected.
    pub port: String,
    /// Address sent with the next set-address request.
    pub flash_address: u16,
    /// Next image byte to send.
    pub byte_cursor: u32,
    /// Buffer size reported by the bootloader.
    pub page_size: Option<u16>,
    /// Set once every block is written; the remaining fuse reads then lead
    /// to leaving programming mode instead of the write loop.
    pub flash_pass_complete: bool,
    min_address: u16,
    max_address: u16,
}

impl BootloaderSession {
    /// Start a session for `image` on `port`. Empty images are rejected.
    pub fn new(port: impl Into<String>, image: &FlashImage) -> Result<Self> {
        let (Some(min_address), Some(max_address)) = (image.min_address(), image.max_address())
        else {
            return Err(Error::InvalidHex("no address/data to write".into()));
        };

        Ok(Self {
            state: UpdateState::Reset,
            port: port.into(),
            flash_address: min_address,
            byte_cursor: u32::from(min_address),
            page_size: None,
            flash_pass_complete: false,
            min_address,
            max_address,
        })
    }

    /// Lowest image address.
    pub fn min_address(&self) -> u16 {
        self.min_address
    }

    /// Highest image address.
    pub fn max_address(&self) -> u16 {
        self.max_address
    }

    /// Rewind the write position to the start of the image.
    pub fn begin_flash_pass(&mut self) {
        self.flash_address = self.min_address;
        self.byte_cursor = u32::from(self.min_address);
    }

    /// Account for one block sent.
    pub fn advance_cursor(&mut self) {
        #[allow(clippy::cast_possible_truncation)]
        let step = BLOCK_SIZE as u32;
        self.byte_cursor += step;
    }

    /// Whether image bytes remain past the cursor.
    pub fn has_more_blocks(&self) -> bool {
        self.byte_cursor <= u32::from(self.max_address)
    }

    /// Move the flash address to the next block.
    pub fn advance_address(&mut self) {
        self.flash_address = self.flash_address.wrapping_add(ADDRESS_STEP);
    }

    /// Write progress, clamped to 0..=100.
    pub fn progress(&self) -> u8 {
        let written = self
            .byte_cursor
            .saturating_sub(u32::from(self.min_address));
        let total = u32::from(self.max_address - self.min_address) + 1;
        let pct = (u64::from(written) * 100 / u64::from(total)).min(100);
        u8::try_from(pct).unwrap_or(100)
    }
}

/// Fuse bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fuses {
    /// Low fuse.
    pub low: Option<u8>,
    /// High fuse.
    pub high: Option<u8>,
    /// Extended fuse.
    pub extended: Option<u8>,
}

impl fmt::Display for Fuses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<u8>| v.map_or_else(|| "--".to_string(), |b| format!("{b:#04x}"));
        write!(
            f,
            "lfuse={} hfuse={} efuse={}",
            show(self.low),
            show(self.high),
            show(self.extended)
        )
    }
}

/// What the bootloader reported during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Reply to `S`.
    pub programmer_id: String,
    /// Reply to `p`.
    pub programmer_type: String,
    /// Reply to `V` as a byte (`0x10` is version 1.0).
    pub sw_version: u8,
    /// Auto-increment support.
    pub auto_increment: bool,
    /// Block buffer size.
    pub block_size: Option<u16>,
    /// Supported device codes.
    pub device_codes: Vec<u8>,
    /// Signature bytes as sent.
    pub signature: Vec<u8>,
    /// Fuses read before writing.
    pub fuses_before: Fuses,
    /// Fuses read after writing.
    pub fuses_after: Fuses,
}

impl DeviceInfo {
    /// Software version: the `V` byte divided by 16.
    pub fn version(&self) -> f64 {
        f64::from(self.sw_version) / 16.0
    }

    /// Version followed by the raw byte, e.g. `1.625 (0x1A)`.
    pub fn version_string(&self) -> String {
        format!("{} (0x{:02X})", self.version(), self.sw_version)
    }

    /// Signature as hex.
    pub fn signature_hex(&self) -> String {
        self.signature
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect()
    }
}
