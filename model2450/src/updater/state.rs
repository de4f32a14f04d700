//! Update steps and their wire contract.

use std::fmt;
use std::time::Duration;

use crate::protocol::bootloader as cmd;

/// Step of a firmware update, in protocol order.
///
/// Each step sends its request, waits [`settle_delay`](Self::settle_delay)
/// and then reads the reply shaped as [`reply`](Self::reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateState {
    /// Let the device settle after the reset performed by discovery.
    Reset,
    /// Pick the bootloader port from the current port list.
    ReadAvailablePorts,
    /// Open the bootloader port.
    InitPort,
    /// `S`: programmer identifier.
    GetSwIdentifier,
    /// `p`: programmer type.
    GetProgType,
    /// `V`: software version.
    GetSwVersion,
    /// `a`: auto-increment support.
    CheckAutoIncrement,
    /// `b`: block access support and buffer size.
    CheckBlockSupport,
    /// `t`: supported device codes.
    GetDevCode,
    /// `TD`: select device type.
    SelectDevType,
    /// `P`: enter programming mode.
    EnterProgMode,
    /// `s`: read signature.
    ReadSignature,
    /// `F`: read low fuse.
    ReadLFuse,
    /// `N`: read high fuse.
    ReadHFuse,
    /// `Q`: read extended fuse.
    ReadEFuse,
    /// `A hi lo`: set flash address.
    SetAddress,
    /// `B 00 80 F data`: load one block.
    WriteBlock,
    /// `L`: leave programming mode.
    LeaveProgMode,
    /// `E`: exit bootloader.
    ExitBootloader,
    /// Update finished.
    Done,
}

/// Shape of a step's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// No device I/O.
    None,
    /// ASCII line (ends on newline or timeout).
    Line,
    /// Short binary reply of at most this many bytes.
    Bytes(usize),
    /// Single acknowledge byte.
    Ack,
}

/// Most bytes read for a short binary reply.
const SHORT_REPLY_LEN: usize = 10;

impl UpdateState {
    /// Fixed request bytes; `None` for steps without a request or whose
    /// request depends on the session (address and block).
    pub fn command(self) -> Option<&'static [u8]> {
        let bytes: &'static [u8] = match self {
            Self::GetSwIdentifier => &[cmd::CMD_SW_IDENTIFIER],
            Self::GetProgType => &[cmd::CMD_PROG_TYPE],
            Self::GetSwVersion => &[cmd::CMD_SW_VERSION],
            Self::CheckAutoIncrement => &[cmd::CMD_AUTO_INCREMENT],
            Self::CheckBlockSupport => &[cmd::CMD_BLOCK_SUPPORT],
            Self::GetDevCode => &[cmd::CMD_DEV_CODES],
            Self::SelectDevType => cmd::CMD_SELECT_DEVICE,
            Self::EnterProgMode => &[cmd::CMD_ENTER_PROG_MODE],
            Self::ReadSignature => &[cmd::CMD_READ_SIGNATURE],
            Self::ReadLFuse => &[cmd::CMD_READ_LFUSE],
            Self::ReadHFuse => &[cmd::CMD_READ_HFUSE],
            Self::ReadEFuse => &[cmd::CMD_READ_EFUSE],
            Self::LeaveProgMode => &[cmd::CMD_LEAVE_PROG_MODE],
            Self::ExitBootloader => &[cmd::CMD_EXIT_BOOTLOADER],
            Self::Reset
            | Self::ReadAvailablePorts
            | Self::InitPort
            | Self::SetAddress
            | Self::WriteBlock
            | Self::Done => return None,
        };
        Some(bytes)
    }

    /// Expected reply shape.
    pub fn reply(self) -> Reply {
        match self {
            Self::GetSwIdentifier
            | Self::GetProgType
            | Self::GetSwVersion
            | Self::CheckAutoIncrement => Reply::Line,
            Self::CheckBlockSupport
            | Self::GetDevCode
            | Self::ReadSignature
            | Self::ReadLFuse
            | Self::ReadHFuse
            | Self::ReadEFuse => Reply::Bytes(SHORT_REPLY_LEN),
            Self::SelectDevType
            | Self::EnterProgMode
            | Self::SetAddress
            | Self::WriteBlock
            | Self::LeaveProgMode
            | Self::ExitBootloader => Reply::Ack,
            Self::Reset | Self::ReadAvailablePorts | Self::InitPort | Self::Done => Reply::None,
        }
    }

    /// Pause after the step's request before its reply is read.
    pub fn settle_delay(self) -> Duration {
        match self {
            Self::Reset => Duration::from_millis(1500),
            Self::ReadAvailablePorts | Self::InitPort | Self::GetSwIdentifier => {
                Duration::from_millis(500)
            },
            Self::GetProgType | Self::GetSwVersion => Duration::from_millis(200),
            Self::Done => Duration::ZERO,
            _ => Duration::from_millis(100),
        }
    }

    /// Next step in the fixed handshake order.
    ///
    /// The flash loop branches ([`ReadEFuse`](Self::ReadEFuse),
    /// [`WriteBlock`](Self::WriteBlock)) are resolved by the driver.
    pub fn next(self) -> Self {
        match self {
            Self::Reset => Self::ReadAvailablePorts,
            Self::ReadAvailablePorts => Self::InitPort,
            Self::InitPort => Self::GetSwIdentifier,
            Self::GetSwIdentifier => Self::GetProgType,
            Self::GetProgType => Self::GetSwVersion,
            Self::GetSwVersion => Self::CheckAutoIncrement,
            Self::CheckAutoIncrement => Self::CheckBlockSupport,
            Self::CheckBlockSupport => Self::GetDevCode,
            Self::GetDevCode => Self::SelectDevType,
            Self::SelectDevType => Self::EnterProgMode,
            Self::EnterProgMode => Self::ReadSignature,
            Self::ReadSignature => Self::ReadLFuse,
            Self::ReadLFuse => Self::ReadHFuse,
            Self::ReadHFuse => Self::ReadEFuse,
            Self::ReadEFuse => Self::SetAddress,
            Self::SetAddress => Self::WriteBlock,
            Self::WriteBlock => Self::SetAddress,
            Self::LeaveProgMode => Self::ExitBootloader,
            Self::ExitBootloader | Self::Done => Self::Done,
        }
    }

    /// Whether the step belongs to the flash write loop.
    pub fn is_flash_write(self) -> bool {
        matches!(self, Self::SetAddress | Self::WriteBlock)
    }

    /// Step name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::ReadAvailablePorts => "ReadAvailablePorts",
            Self::InitPort => "InitPort",
            Self::GetSwIdentifier => "GetSwIdentifier",
            Self::GetProgType => "GetProgType",
            Self::GetSwVersion => "GetSwVersion",
            Self::CheckAutoIncrement => "CheckAutoIncrement",
            Self::CheckBlockSupport => "CheckBlockSupport",
            Self::GetDevCode => "GetDevCode",
            Self::SelectDevType => "SelectDevType",
            Self::EnterProgMode => "EnterProgMode",
            Self::ReadSignature => "ReadSignature",
            Self::ReadLFuse => "ReadLFuse",
            Self::ReadHFuse => "ReadHFuse",
            Self::ReadEFuse => "ReadEFuse",
            Self::SetAddress => "SetAddress",
            Self::WriteBlock => "WriteBlock",
            Self::LeaveProgMode => "LeaveProgMode",
            Self::ExitBootloader => "ExitBootloader",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
