//! In-memory stand-ins for serial ports and the host bus, used by unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::discovery::DeviceBus;
use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialConfig};

/// Port with a canned read buffer and a recorded write buffer.
///
/// Reads time out once the buffer is drained.
pub(crate) struct MockSerial {
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
    fail_reads: bool,
    closed: bool,
}

impl MockSerial {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            write_buf: Vec::new(),
            fail_reads: false,
            closed: false,
        }
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.write_buf
    }

    pub(crate) fn fail_reads(&mut self) {
        self.fail_reads = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockSerial {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(1000)
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// What the mock bootloader saw, shared with the test after the port is
/// moved into the updater.
#[derive(Debug, Default)]
pub(crate) struct BootloaderLog {
    /// Every complete request, in order.
    pub(crate) requests: Vec<Vec<u8>>,
    /// Addresses set before each block load.
    pub(crate) blocks: Vec<(u16, Vec<u8>)>,
    pub(crate) closed: bool,
}

impl BootloaderLog {
    /// First byte of every request.
    pub(crate) fn commands(&self) -> Vec<u8> {
        self.requests.iter().map(|r| r[0]).collect()
    }
}

/// Caterina bootloader answering each request per the AVR109 command set.
pub(crate) struct MockBootloader {
    name: String,
    pending: Vec<u8>,
    read_buf: VecDeque<u8>,
    overrides: HashMap<u8, Vec<u8>>,
    address: u16,
    log: Arc<Mutex<BootloaderLog>>,
}

impl MockBootloader {
    pub(crate) fn new(name: &str, overrides: HashMap<u8, Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            pending: Vec::new(),
            read_buf: VecDeque::new(),
            overrides,
            address: 0,
            log: Arc::default(),
        }
    }

    fn request_len(pending: &[u8]) -> Option<usize> {
        match pending.first()? {
            b'A' => Some(3),
            b'B' => {
                let size = (usize::from(*pending.get(1)?) << 8) | usize::from(*pending.get(2)?);
                Some(4 + size)
            },
            b'T' => Some(2),
            _ => Some(1),
        }
    }

    fn reply(&mut self, request: &[u8]) -> Vec<u8> {
        if let Some(reply) = self.overrides.get(&request[0]) {
            return reply.clone();
        }
        match request[0] {
            b'S' => b"CATERIN".to_vec(),
            b'p' => b"S".to_vec(),
            b'V' => b"10".to_vec(),
            b'a' => b"Y".to_vec(),
            b'b' => b"Y\x00\x80".to_vec(),
            b't' => vec![0x44, 0x00],
            b's' => vec![0x87, 0x95, 0x1E],
            b'F' => vec![0xFF],
            b'N' => vec![0xD8],
            b'Q' => vec![0xCB],
            b'A' => {
                self.address = u16::from_be_bytes([request[1], request[2]]);
                vec![b'\r']
            },
            b'B' => {
                let mut log = self.log.lock().unwrap();
                log.blocks.push((self.address, request[4..].to_vec()));
                vec![b'\r']
            },
            b'T' | b'P' | b'L' | b'E' => vec![b'\r'],
            _ => vec![b'?'],
        }
    }
}

impl Read for MockBootloader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockBootloader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(len) = Self::request_len(&self.pending) {
            if self.pending.len() < len {
                break;
            }
            let request: Vec<u8> = self.pending.drain(..len).collect();
            let reply = self.reply(&request);
            self.read_buf.extend(reply);
            self.log.lock().unwrap().requests.push(request);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockBootloader {
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(1000)
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Host bus replaying a sequence of port-list snapshots.
///
/// Each `list_ports` call takes the next snapshot; the last one repeats.
/// Opened ports are mock bootloaders sharing one [`BootloaderLog`].
pub(crate) struct ScriptedBus {
    snapshots: RefCell<VecDeque<Vec<PortInfo>>>,
    revisions: HashMap<String, u16>,
    busy: HashSet<String>,
    reset_errors: HashSet<String>,
    failed_opens: RefCell<u32>,
    overrides: HashMap<u8, Vec<u8>>,
    resets: RefCell<Vec<String>>,
    sleeps: RefCell<Vec<Duration>>,
    opened: RefCell<Vec<String>>,
    log: Arc<Mutex<BootloaderLog>>,
}

impl ScriptedBus {
    pub(crate) fn new(snapshots: Vec<Vec<PortInfo>>) -> Self {
        Self {
            snapshots: RefCell::new(snapshots.into()),
            revisions: HashMap::new(),
            busy: HashSet::new(),
            reset_errors: HashSet::new(),
            failed_opens: RefCell::new(0),
            overrides: HashMap::new(),
            resets: RefCell::default(),
            sleeps: RefCell::default(),
            opened: RefCell::default(),
            log: Arc::default(),
        }
    }

    pub(crate) fn with_revision(mut self, port: &str, revision: u16) -> Self {
        self.revisions.insert(port.into(), revision);
        self
    }

    pub(crate) fn with_busy(mut self, port: &str) -> Self {
        self.busy.insert(port.into());
        self
    }

    pub(crate) fn with_reset_error(mut self, port: &str) -> Self {
        self.reset_errors.insert(port.into());
        self
    }

    /// Fail the first `n` opens with a generic error.
    pub(crate) fn with_failed_opens(self, n: u32) -> Self {
        *self.failed_opens.borrow_mut() = n;
        self
    }

    /// Replace the bootloader's reply to `command`.
    pub(crate) fn with_reply(mut self, command: u8, reply: &[u8]) -> Self {
        self.overrides.insert(command, reply.to_vec());
        self
    }

    pub(crate) fn resets(&self) -> Vec<String> {
        self.resets.borrow().clone()
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }

    pub(crate) fn bootloader(&self) -> Arc<Mutex<BootloaderLog>> {
        Arc::clone(&self.log)
    }
}

impl DeviceBus for ScriptedBus {
    type Port = MockBootloader;

    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let mut snapshots = self.snapshots.borrow_mut();
        if snapshots.len() > 1 {
            Ok(snapshots.pop_front().unwrap_or_default())
        } else {
            Ok(snapshots.front().cloned().unwrap_or_default())
        }
    }

    fn revision(&self, port: &PortInfo) -> Result<Option<u16>> {
        Ok(self.revisions.get(&port.name).copied())
    }

    fn open(&self, config: &SerialConfig) -> Result<Self::Port> {
        if self.busy.contains(&config.port_name) {
            return Err(Error::PortBusy {
                port: config.port_name.clone(),
            });
        }
        {
            let mut failed = self.failed_opens.borrow_mut();
            if *failed > 0 {
                *failed -= 1;
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "device not ready",
                )));
            }
        }
        self.opened.borrow_mut().push(config.port_name.clone());
        let mut port = MockBootloader::new(&config.port_name, self.overrides.clone());
        port.log = Arc::clone(&self.log);
        Ok(port)
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }

    fn send_reset(&self, config: &SerialConfig) -> Result<()> {
        if self.busy.contains(&config.port_name) {
            return Err(Error::PortBusy {
                port: config.port_name.clone(),
            });
        }
        self.resets.borrow_mut().push(config.port_name.clone());
        if self.reset_errors.contains(&config.port_name) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "reset write timed out",
            )));
        }
        Ok(())
    }
}
