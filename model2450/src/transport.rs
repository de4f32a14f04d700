//! Byte-level access to an open serial port.
//!
//! [`Transport`] owns the port for one session and offers the read shapes the
//! bootloader replies come in: a single acknowledge byte, a short fixed-size
//! binary reply, or an ASCII line. Caterina replies carry no line terminator,
//! so a line read normally ends on the port timeout.
//!
//! A read that times out is not an error here; it yields `None` (or the
//! bytes gathered so far) and the caller decides what that means.

use crate::error::Result;
use crate::port::Port;
use log::trace;
use std::io::{self, Read};

/// Upper bound for a single line read.
const MAX_LINE_LEN: usize = 256;

/// Serial transport over a [`Port`].
pub struct Transport<P: Port> {
    port: P,
}

#[cfg(feature = "native")]
impl Transport<crate::port::NativePort> {
    /// Open a native serial port. Retrying is left to the caller.
    pub fn open(config: &crate::port::SerialConfig) -> Result<Self> {
        let port = crate::port::NativePort::open(config)?;
        Ok(Self::new(port))
    }
}

impl<P: Port> Transport<P> {
    /// Wrap an already open port.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Unwrap the port.
    pub fn into_inner(self) -> P {
        self.port
    }

    /// Write a command and flush.
    pub fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX [{}]: {:02X?}", bytes.len(), truncate(bytes));
        self.port.write_all_bytes(bytes)
    }

    /// Read one byte, or `None` on timeout.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        let n = self.fill(&mut buf)?;
        let byte = (n == 1).then_some(buf[0]);
        trace!("RX byte: {byte:02X?}");
        Ok(byte)
    }

    /// Read up to `n` bytes, stopping early on timeout.
    ///
    /// Returns `None` if nothing arrived.
    pub fn read_bytes(&mut self, n: usize) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        let got = self.fill(&mut buf)?;
        buf.truncate(got);
        trace!("RX [{got}/{n}]: {:02X?}", truncate(&buf));
        Ok((!buf.is_empty()).then_some(buf))
    }

    /// Read a line (up to `\n` or timeout) with trailing whitespace removed.
    ///
    /// Returns `None` if nothing arrived or the bytes are not UTF-8.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        while line.len() < MAX_LINE_LEN {
            if self.fill(&mut byte)? == 0 {
                break;
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }

        if line.is_empty() {
            trace!("RX line: <timeout>");
            return Ok(None);
        }

        match String::from_utf8(line) {
            Ok(text) => {
                let text = text.trim_end().to_string();
                trace!("RX line: {text:?}");
                Ok(Some(text))
            },
            Err(e) => {
                trace!("RX line not UTF-8: {:02X?}", e.as_bytes());
                Ok(None)
            },
        }
    }

    /// Discard pending input and output.
    pub fn clear(&mut self) -> Result<()> {
        self.port.clear_buffers()
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<P: Port> Read for Transport<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

fn truncate(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(16)]
}
