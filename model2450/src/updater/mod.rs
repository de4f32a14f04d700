//! Firmware update over the Caterina bootloader.
//!
//! [`FirmwareUpdater`] walks the [`UpdateState`] sequence one step at a
//! time. A step sends its request, waits the step's settle delay and parses
//! the reply; any reply that does not match aborts the run. Steps can be
//! driven one by one with [`FirmwareUpdater::step`] from an event loop, or
//! all at once with the blocking [`FirmwareUpdater::run`].
//!
//! ```rust,no_run
//! use model2450::discovery::{self, DiscoveryConfig, NativeBus};
//! use model2450::image::FlashImage;
//! use model2450::updater::FirmwareUpdater;
//!
//! fn main() -> model2450::Result<()> {
//!     let image = FlashImage::from_file("sensor.hex")?;
//!     let found = discovery::detect_bootloader_mode(&NativeBus, "/dev/ttyACM0", &DiscoveryConfig::default())?;
//!
//!     let report = FirmwareUpdater::new(NativeBus, &image, found.port)?
//!         .with_progress_sink(|pct: u8| println!("{pct}%"))
//!         .run()?;
//!     println!("wrote {} blocks", report.blocks_written);
//!     Ok(())
//! }
//! ```

pub mod session;
pub mod sink;
pub mod state;

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::device::DeviceIdentity;
use crate::discovery::DeviceBus;
use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::port::{PortInfo, SerialConfig};
use crate::protocol::bootloader::{self as cmd, ACK, SW_IDENTIFIER};
use crate::transport::Transport;

pub use session::{BootloaderSession, DeviceInfo, Fuses};
pub use sink::{CancelToken, LogSink, NullSink, ProgressSink};
pub use state::{Reply, UpdateState};

/// Attempts to open the bootloader port.
pub const OPEN_ATTEMPTS: u32 = 10;

/// Pause between open attempts.
pub const OPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Updater settings.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Serial settings for the bootloader port (port name is filled in).
    pub serial: SerialConfig,
    /// Identity used when picking the bootloader port.
    pub identity: DeviceIdentity,
    /// Sleep the per-step settle delays.
    pub settle: bool,
    /// Open attempts before giving up.
    pub open_attempts: u32,
    /// Pause between open attempts.
    pub open_backoff: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            identity: DeviceIdentity::default(),
            settle: true,
            open_attempts: OPEN_ATTEMPTS,
            open_backoff: OPEN_BACKOFF,
        }
    }
}

impl UpdaterConfig {
    /// Skip settle delays and open backoff (for simulated devices).
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.settle = false;
        self.open_backoff = Duration::ZERO;
        self
    }
}

/// Outcome of a successful update.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// Bootloader port used.
    pub port: String,
    /// Handshake values.
    pub info: DeviceInfo,
    /// Image bytes.
    pub bytes: usize,
    /// Blocks sent.
    pub blocks_written: usize,
    /// Wall time.
    pub elapsed: Duration,
}

/// Drives one firmware update session.
pub struct FirmwareUpdater<'a, B: DeviceBus> {
    bus: B,
    config: UpdaterConfig,
    image: &'a FlashImage,
    session: BootloaderSession,
    transport: Option<Transport<B::Port>>,
    info: DeviceInfo,
    blocks_written: usize,
    log: Box<dyn LogSink + Send + 'a>,
    progress: Box<dyn ProgressSink + Send + 'a>,
    cancel: CancelToken,
    started: Instant,
}

impl<'a, B: DeviceBus> FirmwareUpdater<'a, B> {
    /// Prepare an update of `image` through the bootloader on `port`.
    pub fn new(bus: B, image: &'a FlashImage, port: impl Into<String>) -> Result<Self> {
        let session = BootloaderSession::new(port, image)?;
        Ok(Self {
            bus,
            config: UpdaterConfig::default(),
            image,
            session,
            transport: None,
            info: DeviceInfo::default(),
            blocks_written: 0,
            log: Box::new(NullSink),
            progress: Box::new(NullSink),
            cancel: CancelToken::new(),
            started: Instant::now(),
        })
    }

    /// Use custom settings.
    #[must_use]
    pub fn with_config(mut self, config: UpdaterConfig) -> Self {
        self.config = config;
        self
    }

    /// Route step messages to `sink`.
    #[must_use]
    pub fn with_log_sink(mut self, sink: impl LogSink + Send + 'a) -> Self {
        self.log = Box::new(sink);
        self
    }

    /// Route progress to `sink`.
    #[must_use]
    pub fn with_progress_sink(mut self, sink: impl ProgressSink + Send + 'a) -> Self {
        self.progress = Box::new(sink);
        self
    }

    /// Observe `token` between steps.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current step.
    pub fn state(&self) -> UpdateState {
        self.session.state
    }

    /// Session state.
    pub fn session(&self) -> &BootloaderSession {
        &self.session
    }

    /// Handshake values gathered so far.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Run every remaining step, sleeping the settle delays in between.
    ///
    /// On error or cancellation the port is closed and the device is left
    /// in whatever mode it was in.
    pub fn run(mut self) -> Result<UpdateReport> {
        self.started = Instant::now();

        while self.session.state != UpdateState::Done {
            if self.cancel.is_cancelled() {
                self.emit(&format!(
                    "Firmware update cancelled at {}",
                    self.session.state
                ));
                self.shutdown();
                return Err(Error::Cancelled);
            }

            if let Err(e) = self.step() {
                self.emit(&e.to_string());
                self.shutdown();
                return Err(e);
            }
        }

        self.shutdown();
        Ok(UpdateReport {
            port: self.session.port.clone(),
            info: self.info.clone(),
            bytes: self.image.len(),
            blocks_written: self.blocks_written,
            elapsed: self.started.elapsed(),
        })
    }

    /// Execute the current step and move to the next one.
    ///
    /// Sends the request, sleeps the settle delay (unless disabled) and
    /// validates the reply.
    pub fn step(&mut self) -> Result<UpdateState> {
        let state = self.session.state;
        debug!("Step {state}");

        self.send(state)?;
        self.settle(state);
        let next = self.receive(state)?;

        if self.session.flash_pass_complete || state.is_flash_write() || next == UpdateState::SetAddress
        {
            self.progress
                .update(self.session.progress());
        }
        if next == UpdateState::Done {
            self.progress.update(100);
        }

        self.session.state = next;
        Ok(next)
    }

    fn settle(&self, state: UpdateState) {
        if self.config.settle {
            thread::sleep(state.settle_delay());
        }
    }

    fn send(&mut self, state: UpdateState) -> Result<()> {
        match state {
            UpdateState::Reset | UpdateState::Done => Ok(()),
            UpdateState::ReadAvailablePorts => {
                let port = self.select_port()?;
                if port != self.session.port {
                    info!("Using bootloader port {port}");
                    self.session.port = port;
                }
                Ok(())
            },
            UpdateState::InitPort => self.open_port(),
            UpdateState::SetAddress => {
                let request = cmd::set_address(self.session.flash_address);
                self.transport()?.write_command(&request)
            },
            UpdateState::WriteBlock => {
                let request = cmd::write_block(self.image, self.session.byte_cursor);
                self.transport()?.write_command(&request)?;
                self.session.advance_cursor();
                self.blocks_written += 1;
                Ok(())
            },
            _ => match state.command() {
                Some(request) => self.transport()?.write_command(request),
                None => Ok(()),
            },
        }
    }

    fn receive(&mut self, state: UpdateState) -> Result<UpdateState> {
        match state {
            UpdateState::Reset | UpdateState::ReadAvailablePorts | UpdateState::Done => {},
            UpdateState::InitPort => self.emit(&format!("Opened {}", self.session.port)),
            UpdateState::GetSwIdentifier => {
                let line = self.transport()?.read_line()?;
                match line {
                    Some(id) if id == SW_IDENTIFIER => {
                        self.emit(&format!("Found Programmer Id: {id}"));
                        self.info.programmer_id = id;
                    },
                    other => {
                        return Err(Error::protocol(
                            state,
                            format!("programmer id read error (got {other:?})"),
                        ));
                    },
                }
            },
            UpdateState::GetProgType => match self.transport()?.read_line()? {
                Some(kind) if !kind.is_empty() => {
                    self.emit(&format!("Programmer Type: {kind}"));
                    self.info.programmer_type = kind;
                },
                _ => return Err(Error::protocol(state, "programmer type not found")),
            },
            UpdateState::GetSwVersion => {
                let line = self.transport()?.read_line()?;
                let version = line
                    .as_deref()
                    .and_then(cmd::parse_sw_version)
                    .ok_or_else(|| {
                        Error::protocol(state, format!("software version unreadable ({line:?})"))
                    })?;
                self.info.sw_version = version;
                self.emit(&format!("Software Version = {}", self.info.version_string()));
            },
            UpdateState::CheckAutoIncrement => {
                let line = self.transport()?.read_line()?;
                self.info.auto_increment = line
                    .as_deref()
                    .is_some_and(|l| l.starts_with('Y'));
                if self.info.auto_increment {
                    self.emit("Programmer supports auto addr increment");
                } else {
                    warn!("Unexpected auto-increment reply: {line:?}");
                    self.emit("Programmer does not report auto addr increment");
                }
            },
            UpdateState::CheckBlockSupport => {
                let reply = self.read_short(state, 3)?;
                let size = cmd::parse_block_size(&reply).ok_or_else(|| {
                    Error::protocol(state, format!("block size unreadable ({reply:02X?})"))
                })?;
                self.info.block_size = Some(size);
                self.session.page_size = Some(size);
                self.emit(&format!(
                    "Programmer supports buffered memory access with buffer size = {size} bytes"
                ));
            },
            UpdateState::GetDevCode => {
                let reply = self.read_short(state, 1)?;
                self.info.device_codes = reply
                    .iter()
                    .copied()
                    .take_while(|&b| b != 0)
                    .collect();
                self.emit(&format!(
                    "Programmer supports the following devices: {:02X?}",
                    self.info.device_codes
                ));
            },
            UpdateState::SelectDevType => {
                self.expect_ack(state)?;
                self.emit("Dev code selected = 0x44");
            },
            UpdateState::EnterProgMode => {
                self.expect_ack(state)?;
                self.emit("Enter into Program mode success");
            },
            UpdateState::ReadSignature => {
                let reply = self.read_short(state, 3)?;
                self.info.signature = reply[..3].to_vec();
                self.emit(&format!("Device Signature = {}", self.info.signature_hex()));
            },
            UpdateState::ReadLFuse | UpdateState::ReadHFuse | UpdateState::ReadEFuse => {
                let value = self.read_short(state, 1)?[0];
                self.record_fuse(state, value);
            },
            UpdateState::SetAddress => self.expect_ack(state)?,
            UpdateState::WriteBlock => {
                self.expect_ack(state)?;
                return Ok(if self.session.has_more_blocks() {
                    self.session.advance_address();
                    UpdateState::SetAddress
                } else {
                    self.session.flash_pass_complete = true;
                    info!("Wrote {} blocks", self.blocks_written);
                    UpdateState::ReadLFuse
                });
            },
            UpdateState::LeaveProgMode => self.expect_ack(state)?,
            UpdateState::ExitBootloader => {
                self.expect_ack(state)?;
                self.emit("Firmware update success!");
            },
        }

        Ok(match state {
            UpdateState::ReadEFuse if self.session.flash_pass_complete => UpdateState::LeaveProgMode,
            UpdateState::ReadEFuse => {
                self.emit(&format!("Writing flash ({} bytes)", self.image.len()));
                self.session.begin_flash_pass();
                UpdateState::SetAddress
            },
            _ => state.next(),
        })
    }

    fn record_fuse(&mut self, state: UpdateState, value: u8) {
        let (fuses, label) = if self.session.flash_pass_complete {
            (&mut self.info.fuses_after, "after write")
        } else {
            (&mut self.info.fuses_before, "before write")
        };
        let name = match state {
            UpdateState::ReadLFuse => {
                fuses.low = Some(value);
                "lfuse"
            },
            UpdateState::ReadHFuse => {
                fuses.high = Some(value);
                "hfuse"
            },
            _ => {
                fuses.extended = Some(value);
                "efuse"
            },
        };
        self.emit(&format!("{name} reads as: {value:#x} ({label})"));
    }

    /// Prefer the session's port, then the device's VID/PID, then anything
    /// that looks like a USB/AVR serial device.
    fn select_port(&self) -> Result<String> {
        let ports = self.bus.list_ports()?;
        let identity = &self.config.identity;

        let pick = ports
            .iter()
            .find(|p| p.name == self.session.port)
            .or_else(|| ports.iter().find(|p| identity.matches(p)))
            .or_else(|| ports.iter().find(|p| looks_like_avr(p)));

        pick.map(|p| p.name.clone()).ok_or_else(|| {
            Error::protocol(UpdateState::ReadAvailablePorts, "no AVR bootloader port found")
        })
    }

    fn open_port(&mut self) -> Result<()> {
        let config = self
            .config
            .serial
            .clone()
            .with_port(self.session.port.clone());
        let attempts = self.config.open_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.bus.open(&config) {
                Ok(port) => {
                    debug!("Opened {} on attempt {attempt}", config.port_name);
                    self.transport = Some(Transport::new(port));
                    return Ok(());
                },
                Err(e @ Error::PortBusy { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        "Open attempt {attempt}/{attempts} on {} failed: {e}",
                        config.port_name
                    );
                    last_err = Some(e);
                    if attempt < attempts && !self.config.open_backoff.is_zero() {
                        thread::sleep(self.config.open_backoff);
                    }
                },
            }
        }

        Err(Error::protocol(
            UpdateState::InitPort,
            format!(
                "failed to open {} after {attempts} attempts: {}",
                config.port_name,
                last_err.map_or_else(String::new, |e| e.to_string())
            ),
        ))
    }

    fn transport(&mut self) -> Result<&mut Transport<B::Port>> {
        let state = self.session.state;
        self.transport
            .as_mut()
            .ok_or_else(|| Error::protocol(state, "bootloader port is not open"))
    }

    fn expect_ack(&mut self, state: UpdateState) -> Result<()> {
        match self.transport()?.read_byte()? {
            Some(ACK) => Ok(()),
            Some(b) => Err(Error::protocol(state, format!("expected CR, got {b:#04x}"))),
            None => Err(Error::protocol(state, "no acknowledge (timeout)")),
        }
    }

    fn read_short(&mut self, state: UpdateState, min_len: usize) -> Result<Vec<u8>> {
        let Reply::Bytes(max) = state.reply() else {
            return Err(Error::protocol(state, "step has no binary reply"));
        };
        match self.transport()?.read_bytes(max)? {
            Some(reply) if reply.len() >= min_len => Ok(reply),
            Some(reply) => Err(Error::protocol(
                state,
                format!("expected at least {min_len} bytes, got {reply:02X?}"),
            )),
            None => Err(Error::protocol(state, "no response (timeout)")),
        }
    }

    fn emit(&mut self, text: &str) {
        info!("{text}");
        self.log.write(text);
    }

    fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("Error closing {}: {e}", transport.name());
            }
        }
    }
}

fn looks_like_avr(port: &PortInfo) -> bool {
    let desc = port.description();
    desc.contains("USB") || desc.contains("AVR")
}
