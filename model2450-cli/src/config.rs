//! Configuration file support for model2450.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MODEL2450_*)
//! 3. Local config file (./model2450.toml)
//! 4. Global config file (~/.config/model2450/config.toml)

use crate::CliError;
use directories::ProjectDirs;
use log::{debug, info, warn};
use model2450::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "model2450.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred normal-mode serial port (e.g., "/dev/ttyACM0" or "COM5").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Overrides for the sensor's USB identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB Vendor ID.
    pub vid: Option<u16>,
    /// USB Product ID.
    pub pid: Option<u16>,
    /// `bcdDevice` values that mean bootloader mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootloader_revisions: Vec<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Device identity overrides.
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike the implicit sources, an explicit file must exist and parse.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid TOML in {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file, warning on failure.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "model2450").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.device.vid.is_some() {
            self.device.vid = other.device.vid;
        }
        if other.device.pid.is_some() {
            self.device.pid = other.device.pid;
        }
        if !other.device.bootloader_revisions.is_empty() {
            self.device.bootloader_revisions = other.device.bootloader_revisions;
        }
    }

    /// Device identity with the configured overrides applied.
    pub fn identity(&self) -> DeviceIdentity {
        let mut identity = DeviceIdentity::default();
        if let Some(vid) = self.device.vid {
            identity.vid = vid;
        }
        if let Some(pid) = self.device.pid {
            identity.pid = pid;
        }
        if !self.device.bootloader_revisions.is_empty() {
            identity
                .bootloader_revisions
                .clone_from(&self.device.bootloader_revisions);
        }
        identity
    }

    /// Remember `serial` as the preferred port.
    ///
    /// Writes to the local config if one exists, otherwise the global one.
    pub fn save_port(&mut self, serial: &str) -> anyhow::Result<PathBuf> {
        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        self.save_port_to(serial, &path)?;
        Ok(path)
    }

    /// Set the preferred port in the file at `path`, keeping its other keys.
    pub fn save_port_to(&mut self, serial: &str, path: &Path) -> anyhow::Result<()> {
        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        on_disk.connection.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        self.connection.serial = Some(serial.to_string());
        info!("Saved port {serial} to {}", path.display());

        Ok(())
    }
}
