//! Caterina (AVR109) bootloader wire format.
//!
//! Requests are single ASCII characters or short binary sequences. Most
//! commands that change state acknowledge with a lone carriage return.

use byteorder::{BigEndian, ByteOrder};

use crate::image::FlashImage;

/// Return software identifier.
pub const CMD_SW_IDENTIFIER: u8 = b'S';
/// Return programmer type.
pub const CMD_PROG_TYPE: u8 = b'p';
/// Return software version.
pub const CMD_SW_VERSION: u8 = b'V';
/// Check auto-increment address support.
pub const CMD_AUTO_INCREMENT: u8 = b'a';
/// Check block (buffered) access support.
pub const CMD_BLOCK_SUPPORT: u8 = b'b';
/// Return supported device codes.
pub const CMD_DEV_CODES: u8 = b't';
/// Select device type `0x44` (ATmega32U4).
pub const CMD_SELECT_DEVICE: &[u8] = b"TD";
/// Enter programming mode.
pub const CMD_ENTER_PROG_MODE: u8 = b'P';
/// Read signature bytes.
pub const CMD_READ_SIGNATURE: u8 = b's';
/// Read low fuse.
pub const CMD_READ_LFUSE: u8 = b'F';
/// Read high fuse.
pub const CMD_READ_HFUSE: u8 = b'N';
/// Read extended fuse.
pub const CMD_READ_EFUSE: u8 = b'Q';
/// Set address (followed by high and low byte).
pub const CMD_SET_ADDRESS: u8 = 0x41;
/// Start block load (followed by size and memory type).
pub const CMD_BLOCK_LOAD: u8 = 0x42;
/// Leave programming mode.
pub const CMD_LEAVE_PROG_MODE: u8 = b'L';
/// Exit bootloader and start the application.
pub const CMD_EXIT_BOOTLOADER: u8 = b'E';

/// Flash memory type selector for block load.
pub const MEM_TYPE_FLASH: u8 = b'F';

/// Identifier the Caterina bootloader answers `S` with.
pub const SW_IDENTIFIER: &str = "CATERIN";

/// Acknowledge byte.
pub const ACK: u8 = b'\r';

/// Data bytes sent per block load.
pub const BLOCK_SIZE: usize = 128;

/// Address increment between blocks (flash is word addressed).
pub const ADDRESS_STEP: u16 = 0x40;

/// Filler for addresses the image does not populate.
pub const PAD_BYTE: u8 = 0xFF;

/// Build a set-address request.
pub fn set_address(address: u16) -> [u8; 3] {
    let mut buf = [CMD_SET_ADDRESS, 0, 0];
    BigEndian::write_u16(&mut buf[1..], address);
    buf
}

/// Build a block-load request carrying [`BLOCK_SIZE`] bytes of `image`
/// starting at byte address `cursor`.
pub fn write_block(image: &FlashImage, cursor: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + BLOCK_SIZE);
    buf.push(CMD_BLOCK_LOAD);

    #[allow(clippy::cast_possible_truncation)] // BLOCK_SIZE fits in u16
    let size = BLOCK_SIZE as u16;
    let mut size_be = [0u8; 2];
    BigEndian::write_u16(&mut size_be, size);
    buf.extend_from_slice(&size_be);
    buf.push(MEM_TYPE_FLASH);

    #[allow(clippy::cast_possible_truncation)]
    buf.extend((0..BLOCK_SIZE as u32).map(|i| image.get(cursor + i).unwrap_or(PAD_BYTE)));
    buf
}

/// Extract the buffer size from a block-support reply (`Y`, size hi, size lo).
pub fn parse_block_size(response: &[u8]) -> Option<u16> {
    response.get(1..3).map(BigEndian::read_u16)
}

/// Parse the two-digit version reply of `V` (e.g. `"10"` for 1.0).
pub fn parse_sw_version(response: &str) -> Option<u8> {
    let digits = response.trim();
    if digits.len() != 2 {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}
