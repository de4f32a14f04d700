//! Telemetry packet framing.
//!
//! The sensor streams telemetry as small binary frames with a two byte
//! header:
//!
//! ```text
//!            byte 0                          byte 1
//! +-------+-----+----------+---------+  +----------+----------+------------+
//! | start | end | reserved | command |  | sequence |  length  |  payload   |
//! +-------+-----+----------+---------+  +----------+----------+------------+
//! | bit 7 | b6  |   b5     | b4..b0  |  | b7..b5   |  b4..b0  | length - 2 |
//! +-------+-----+----------+---------+  +----------+----------+------------+
//! ```
//!
//! `length` counts the whole frame, header included, so a frame carries at
//! most 29 payload bytes. Longer messages are split across frames: the first
//! one has `start` set and the last one has `end` set.

use log::trace;
use std::io::{self, Read};
use thiserror::Error;

/// Header length in bytes.
pub const HEADER_LEN: usize = 2;

/// Largest frame length expressible in the 5-bit length field.
pub const MAX_FRAME_LEN: usize = 0x1F;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

const FIELD_MASK: u8 = 0x1F;

/// Errors raised while decoding or building a telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer than two header bytes were supplied.
    #[error("packet too short to decode header ({len} bytes)")]
    PacketTooShort {
        /// Bytes supplied.
        len: usize,
    },

    /// The header declares more bytes than were supplied.
    #[error("packet length mismatch: expected {declared}, got {available}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Bytes supplied.
        available: usize,
    },

    /// The payload does not fit in one frame.
    #[error("payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN} byte frame limit")]
    PayloadTooLong {
        /// Payload length requested.
        len: usize,
    },
}

/// A decoded telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryPacket {
    /// First frame of a message.
    pub start: bool,
    /// Last frame of a message.
    pub end: bool,
    /// Reserved flag, carried through untouched.
    pub reserved: bool,
    /// Command code (5 bits).
    pub command: u8,
    /// Rolling sequence number (3 bits).
    pub sequence: u8,
    /// Declared frame length including the header (5 bits).
    pub length: u8,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl TelemetryPacket {
    /// Build a frame for `payload`, computing the length field.
    pub fn new(command: u8, sequence: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(DecodeError::PayloadTooLong { len: payload.len() });
        }

        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FRAME_LEN
        let length = (payload.len() + HEADER_LEN) as u8;

        Ok(Self {
            start: false,
            end: false,
            reserved: false,
            command: command & FIELD_MASK,
            sequence: sequence & 0x07,
            length,
            payload: payload.to_vec(),
        })
    }

    /// Set the start/end flags.
    #[must_use]
    pub fn with_flags(mut self, start: bool, end: bool) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Payload bytes the header promises.
    pub fn declared_payload_len(&self) -> usize {
        usize::from(self.length).saturating_sub(HEADER_LEN)
    }

    /// Whether this frame closes a message.
    ///
    /// A frame carrying fewer payload bytes than its header declares also
    /// ends the message; short sensor replies rely on it.
    pub fn is_terminal(&self) -> bool {
        self.end || self.payload.len() < self.declared_payload_len()
    }

    /// Serialize the frame (header + payload).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b0 = self.command & FIELD_MASK;
        if self.start {
            b0 |= 0x80;
        }
        if self.end {
            b0 |= 0x40;
        }
        if self.reserved {
            b0 |= 0x20;
        }
        let b1 = ((self.sequence & 0x07) << 5) | (self.length & FIELD_MASK);

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(b0);
        out.push(b1);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Decode a frame from raw bytes.
///
/// Bytes past the declared length are ignored.
pub fn decode_header(bytes: &[u8]) -> Result<TelemetryPacket, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::PacketTooShort { len: bytes.len() });
    }

    let b0 = bytes[0];
    let b1 = bytes[1];
    let length = b1 & FIELD_MASK;

    if usize::from(length) > bytes.len() {
        return Err(DecodeError::LengthMismatch {
            declared: usize::from(length),
            available: bytes.len(),
        });
    }

    let payload_end = usize::from(length).max(HEADER_LEN);

    Ok(TelemetryPacket {
        start: b0 & 0x80 != 0,
        end: b0 & 0x40 != 0,
        reserved: b0 & 0x20 != 0,
        command: b0 & FIELD_MASK,
        sequence: (b1 >> 5) & 0x07,
        length,
        payload: bytes[HEADER_LEN..payload_end].to_vec(),
    })
}

/// Read one raw frame from `reader`.
///
/// Returns `Ok(None)` when the stream ends or times out before a whole
/// frame arrived; only hard I/O failures are errors.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_LEN];
    if read_full(reader, &mut header)? < HEADER_LEN {
        return Ok(None);
    }

    let remaining = usize::from(header[1] & FIELD_MASK).saturating_sub(HEADER_LEN);
    let mut frame = Vec::with_capacity(HEADER_LEN + remaining);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + remaining, 0);

    if read_full(reader, &mut frame[HEADER_LEN..])? < remaining {
        trace!("Short telemetry frame, dropping {} bytes", frame.len());
        return Ok(None);
    }

    Ok(Some(frame))
}

/// Fill `buf`, retrying partial reads until full, end of stream or timeout.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Streaming reassembler for multi-frame telemetry messages.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    completed: usize,
}

impl Reassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame; returns the message once a terminal frame arrives.
    ///
    /// A start frame discards anything buffered from an unfinished message.
    pub fn push(&mut self, packet: &TelemetryPacket) -> Option<Vec<u8>> {
        if packet.start {
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(&packet.payload);

        if packet.is_terminal() {
            self.completed += 1;
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Number of messages completed so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Bytes buffered for the message in progress.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

/// Join the payloads of one message, starting at the first start frame.
///
/// If no frame terminates the message, whatever was gathered is returned.
pub fn reassemble<'a, I>(frames: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a TelemetryPacket>,
{
    let mut reassembler = Reassembler::new();
    for frame in frames.into_iter().skip_while(|f| !f.start) {
        if let Some(message) = reassembler.push(frame) {
            return message;
        }
    }
    reassembler.buffer
}
