//! Normal-mode command and telemetry session.
//!
//! In normal mode the sensor takes plain ASCII commands terminated by
//! `\r\n`. Replies come back either as text lines (`version`, `status`) or as
//! framed telemetry packets (`run` block frames, `stream` samples), see
//! [`crate::protocol::packet`].

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::packet::{Reassembler, decode_header, read_frame};
use crate::transport::Transport;
use crate::updater::CancelToken;

/// Default capture window for block frames.
pub const DEFAULT_CAPTURE: Duration = Duration::from_secs(10);

/// Stream level used when none is given.
pub const DEFAULT_STREAM_LEVEL: u8 = 3;

/// Commands understood by the application firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Start block-frame output.
    Run,
    /// Stop block-frame output.
    Stop,
    /// Set stream level (`0` stops streaming).
    Stream(u8),
    /// Report status.
    Status,
    /// Report firmware/hardware version.
    Version,
    /// Report packet counters.
    Packets,
    /// Reboot into the bootloader.
    ResetToBootloader,
}

impl DeviceCommand {
    /// Wire form, including the line terminator.
    pub fn to_line(self) -> String {
        format!("{self}\r\n")
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => f.write_str("run"),
            Self::Stop => f.write_str("stop"),
            Self::Stream(level) => write!(f, "stream {level}"),
            Self::Status => f.write_str("status"),
            Self::Version => f.write_str("version"),
            Self::Packets => f.write_str("packets"),
            Self::ResetToBootloader => f.write_str("reset -b"),
        }
    }
}

impl FromStr for DeviceCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();
        let cmd = match (words.next(), words.next()) {
            (Some("run"), None) => Self::Run,
            (Some("stop"), None) => Self::Stop,
            (Some("status"), None) => Self::Status,
            (Some("version"), None) => Self::Version,
            (Some("packets"), None) => Self::Packets,
            (Some("stream"), Some(level)) => Self::Stream(
                level
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid stream level: {level}")))?,
            ),
            _ => return Err(Error::Config(format!("unknown device command: {s:?}"))),
        };
        if words.next().is_some() {
            return Err(Error::Config(format!("unexpected arguments in {s:?}")));
        }
        Ok(cmd)
    }
}

/// One parsed stream sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "value", rename_all = "lowercase"))]
pub enum StreamRecord {
    /// `r : g : b`, each clamped to 0..=255.
    Color {
        /// Red.
        r: u8,
        /// Green.
        g: u8,
        /// Blue.
        b: u8,
    },
    /// Single light reading.
    Light(i64),
}

/// Parse one stream line. Returns `None` for lines that are neither form.
pub fn parse_stream_record(line: &str) -> Option<StreamRecord> {
    let line = line.trim();
    if line.contains(':') {
        let mut parts = line.split(':').map(|p| p.trim().parse::<i64>());
        let r = parts.next()?.ok()?;
        let g = parts.next()?.ok()?;
        let b = parts.next()?.ok()?;
        return Some(StreamRecord::Color {
            r: clamp_channel(r),
            g: clamp_channel(g),
            b: clamp_channel(b),
        });
    }
    line.parse().ok().map(StreamRecord::Light)
}

fn clamp_channel(v: i64) -> u8 {
    u8::try_from(v.clamp(0, 255)).unwrap_or(u8::MAX)
}

/// Render a reassembled message: trimmed ASCII, or hex for binary payloads.
pub fn message_text(message: &[u8]) -> String {
    if message.is_ascii() {
        String::from_utf8_lossy(message)
            .trim()
            .to_string()
    } else {
        message
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Result of a block-frame capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Frames read.
    pub frames: usize,
    /// Complete messages reassembled.
    pub messages: usize,
    /// Frames that failed to decode.
    pub decode_errors: usize,
}

/// Session with the sensor in normal mode.
pub struct TelemetrySession<P: Port> {
    transport: Transport<P>,
    reassembler: Reassembler,
    frames: usize,
}

#[cfg(feature = "native")]
impl TelemetrySession<crate::port::NativePort> {
    /// Open the sensor's normal-mode port.
    pub fn open(config: &crate::port::SerialConfig) -> Result<Self> {
        Ok(Self::new(crate::port::NativePort::open(config)?))
    }
}

impl<P: Port> TelemetrySession<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self {
            transport: Transport::new(port),
            reassembler: Reassembler::new(),
            frames: 0,
        }
    }

    /// Send a command.
    pub fn send(&mut self, command: DeviceCommand) -> Result<()> {
        debug!("Sending {command:?}");
        self.transport
            .write_command(command.to_line().as_bytes())
    }

    /// Send a command and collect reply lines until the device goes quiet.
    pub fn query(&mut self, command: DeviceCommand) -> Result<Vec<String>> {
        self.transport.clear()?;
        self.send(command)?;

        let mut lines = Vec::new();
        while let Some(line) = self.transport.read_line()? {
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Ask for the firmware/hardware version; `None` if nothing came back.
    pub fn version(&mut self) -> Result<Option<String>> {
        let lines = self.query(DeviceCommand::Version)?;
        Ok((!lines.is_empty()).then(|| lines.concat()))
    }

    /// Read frames until one completes a message, or until a read times out.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(raw) = read_frame(&mut self.transport)? else {
                return Ok(None);
            };
            self.frames += 1;
            let packet = decode_header(&raw)?;
            trace!(
                "Frame cmd={} seq={} len={} start={} end={}",
                packet.command, packet.sequence, packet.length, packet.start, packet.end
            );
            if let Some(message) = self.reassembler.push(&packet) {
                return Ok(Some(message));
            }
        }
    }

    /// Send `run`, report each reassembled message for `duration`, then send
    /// `stop`.
    pub fn capture_blocks<F>(
        &mut self,
        duration: Duration,
        cancel: &CancelToken,
        mut on_message: F,
    ) -> Result<CaptureSummary>
    where
        F: FnMut(&str),
    {
        self.send(DeviceCommand::Run)?;
        let start = Instant::now();
        let frames_before = self.frames;
        let mut summary = CaptureSummary::default();

        let outcome = (|| -> Result<()> {
            while start.elapsed() < duration && !cancel.is_cancelled() {
                match self.next_message() {
                    Ok(Some(message)) => {
                        summary.messages += 1;
                        on_message(&message_text(&message));
                    },
                    Ok(None) => {},
                    Err(Error::Decode(e)) => {
                        warn!("Dropping undecodable frame: {e}");
                        summary.decode_errors += 1;
                    },
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })();

        summary.frames = self.frames - frames_before;
        self.send(DeviceCommand::Stop)?;
        outcome.map(|()| summary)
    }

    /// Send `stream <level>`, report each parsed sample for `duration`,
    /// then send `stream 0`. Returns the number of samples.
    pub fn capture_stream<F>(
        &mut self,
        level: u8,
        duration: Duration,
        cancel: &CancelToken,
        mut on_record: F,
    ) -> Result<usize>
    where
        F: FnMut(StreamRecord),
    {
        self.send(DeviceCommand::Stream(level))?;
        let start = Instant::now();
        let mut buffer: Vec<u8> = Vec::new();
        let mut samples = 0;

        let outcome = (|| -> Result<()> {
            while start.elapsed() < duration && !cancel.is_cancelled() {
                let Some(raw) = read_frame(&mut self.transport)? else {
                    continue;
                };
                let packet = match decode_header(&raw) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Dropping undecodable frame: {e}");
                        continue;
                    },
                };
                buffer.extend_from_slice(&packet.payload);

                while let Some(pos) = buffer.windows(2).position(|w| w == b"\r\n") {
                    let line: Vec<u8> = buffer.drain(..pos + 2).collect();
                    let text = String::from_utf8_lossy(&line[..pos]);
                    match parse_stream_record(&text) {
                        Some(record) => {
                            samples += 1;
                            on_record(record);
                        },
                        None => debug!("Unparsed stream line: {text:?}"),
                    }
                }
            }
            Ok(())
        })();

        self.send(DeviceCommand::Stream(0))?;
        outcome.map(|()| samples)
    }

    /// Frames read so far.
    pub fn frames_read(&self) -> usize {
        self.frames
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// Unwrap the port.
    pub fn into_inner(self) -> P {
        self.transport.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::TelemetryPacket;
    use crate::testing::MockSerial;

    fn frames(parts: &[(bool, bool, &[u8])]) -> Vec<u8> {
        parts
            .iter()
            .flat_map(|(s, e, p)| {
                TelemetryPacket::new(1, 0, p)
                    .unwrap()
                    .with_flags(*s, *e)
                    .to_bytes()
            })
            .collect()
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(DeviceCommand::Run.to_line(), "run\r\n");
        assert_eq!(DeviceCommand::Stream(3).to_line(), "stream 3\r\n");
        assert_eq!(DeviceCommand::Packets.to_line(), "packets\r\n");
        assert_eq!(DeviceCommand::ResetToBootloader.to_line(), "reset -b\r\n");
    }

    #[test]
    fn test_command_parse() {
        assert_eq!("status".parse::<DeviceCommand>().unwrap(), DeviceCommand::Status);
        assert_eq!("stream 0".parse::<DeviceCommand>().unwrap(), DeviceCommand::Stream(0));
        assert!("stream x".parse::<DeviceCommand>().is_err());
        assert!("reboot".parse::<DeviceCommand>().is_err());
        assert!("run now".parse::<DeviceCommand>().is_err());
    }

    #[test]
    fn test_parse_stream_record() {
        assert_eq!(
            parse_stream_record("255 : 12 : 300"),
            Some(StreamRecord::Color { r: 255, g: 12, b: 255 })
        );
        assert_eq!(
            parse_stream_record("-4:0:7"),
            Some(StreamRecord::Color { r: 0, g: 0, b: 7 })
        );
        assert_eq!(parse_stream_record("5"), Some(StreamRecord::Light(5)));
        assert_eq!(parse_stream_record("1 : 2"), None);
        assert_eq!(parse_stream_record("ok"), None);
    }

    #[test]
    fn test_message_text() {
        assert_eq!(message_text(b" 12 : 34 \r\n"), "12 : 34");
        assert_eq!(message_text(&[0x80, 0x01]), "8001");
    }

    #[test]
    fn test_query_collects_lines() {
        let mut session = TelemetrySession::new(MockSerial::new(b"FW 2.1\r\nHW B\r\n"));
        assert_eq!(session.version().unwrap().as_deref(), Some("FW 2.1HW B"));
        assert_eq!(session.into_inner().written(), b"version\r\n");
    }

    #[test]
    fn test_version_none_when_silent() {
        let mut session = TelemetrySession::new(MockSerial::new(b""));
        assert_eq!(session.version().unwrap(), None);
    }

    #[test]
    fn test_next_message_reassembles() {
        let data = frames(&[(true, false, b"12 : "), (false, true, b"34\r\n")]);
        let mut session = TelemetrySession::new(MockSerial::new(&data));
        assert_eq!(session.next_message().unwrap(), Some(b"12 : 34\r\n".to_vec()));
        assert_eq!(session.frames_read(), 2);
        assert_eq!(session.next_message().unwrap(), None);
    }

    #[test]
    fn test_capture_blocks_sends_run_and_stop() {
        let data = frames(&[
            (true, true, b"block 1"),
            (true, false, b"block "),
            (false, true, b"2"),
        ]);
        let mut session = TelemetrySession::new(MockSerial::new(&data));
        let mut seen = Vec::new();

        let summary = session
            .capture_blocks(Duration::from_millis(50), &CancelToken::new(), |m| {
                seen.push(m.to_string());
            })
            .unwrap();

        assert_eq!(seen, vec!["block 1", "block 2"]);
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.frames, 3);
        assert_eq!(session.into_inner().written(), b"run\r\nstop\r\n");
    }

    #[test]
    fn test_capture_blocks_cancelled_still_stops() {
        let token = CancelToken::new();
        token.cancel();
        let mut session = TelemetrySession::new(MockSerial::new(b""));
        let summary = session
            .capture_blocks(Duration::from_secs(60), &token, |_| {})
            .unwrap();
        assert_eq!(summary, CaptureSummary::default());
        assert_eq!(session.into_inner().written(), b"run\r\nstop\r\n");
    }

    #[test]
    fn test_capture_stream_parses_split_lines() {
        let data = frames(&[
            (true, false, b"10 : 20 "),
            (false, false, b": 30\r\n7\r"),
            (false, true, b"\n"),
        ]);
        let mut session = TelemetrySession::new(MockSerial::new(&data));
        let mut records = Vec::new();

        let n = session
            .capture_stream(3, Duration::from_millis(50), &CancelToken::new(), |r| {
                records.push(r);
            })
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(
            records,
            vec![
                StreamRecord::Color { r: 10, g: 20, b: 30 },
                StreamRecord::Light(7)
            ]
        );
        assert_eq!(session.into_inner().written(), b"stream 3\r\nstream 0\r\n");
    }

    #[test]
    fn test_capture_surfaces_io_errors_after_stop() {
        let mut port = MockSerial::new(b"");
        port.fail_reads();
        let mut session = TelemetrySession::new(port);
        let err = session
            .capture_blocks(Duration::from_secs(1), &CancelToken::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        let port = session.into_inner();
        assert_eq!(port.written(), b"run\r\nstop\r\n");
        assert!(!port.is_closed());
    }
}
