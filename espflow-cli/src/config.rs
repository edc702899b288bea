//! Configuration file support for espflow.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ESPFLOW_*)
//! 3. Local config file (./espflow.toml or ./espflow_ports.toml)
//! 4. Global config file (~/.config/espflow/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "espflow.toml";

/// Local file remembering serial ports and USB devices.
pub const LOCAL_PORTS_CONFIG: &str = "espflow_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default chip type (`auto`, `esp32`, `esp32s3`, ...).
    pub chip: Option<String>,
    /// Default flash offset, in the same forms `--offset` accepts.
    pub offset: Option<String>,
    /// Reset mode before the operation (esptool `--before`).
    pub before: Option<String>,
    /// Reset mode after the operation (esptool `--after`).
    pub after: Option<String>,
}

/// External flasher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlasherConfig {
    /// Commands tried in order to locate esptool, e.g. `"python3 -m esptool"`.
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Flasher resolution.
    #[serde(default)]
    pub flasher: FlasherConfig,
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

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports_config) = Self::load_ports_config() {
            config.merge_ports(ports_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Load ports configuration, local file first, then the global one.
    fn load_ports_config() -> Option<PortConfig> {
        let mut paths = vec![PathBuf::from(LOCAL_PORTS_CONFIG)];
        if let Some(global_dir) = Self::global_config_dir() {
            paths.push(global_dir.join("ports.toml"));
        }

        paths.into_iter().find_map(|path| {
            let content = fs::read_to_string(&path).ok()?;
            match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded ports config from {}", path.display());
                    Some(config)
                },
                Err(e) => {
                    warn!("Failed to parse ports file {}: {}", path.display(), e);
                    None
                },
            }
        })
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "espflow").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        self.merge_ports(other.port);

        if other.flash.chip.is_some() {
            self.flash.chip = other.flash.chip;
        }
        if other.flash.offset.is_some() {
            self.flash.offset = other.flash.offset;
        }
        if other.flash.before.is_some() {
            self.flash.before = other.flash.before;
        }
        if other.flash.after.is_some() {
            self.flash.after = other.flash.after;
        }

        // A non-empty candidate list replaces the previous one as a whole.
        if !other.flasher.candidates.is_empty() {
            self.flasher.candidates = other.flasher.candidates;
        }
    }

    fn merge_ports(&mut self, other: PortConfig) {
        if other.connection.serial.is_some() {
            self.port.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.port.connection.baud = other.connection.baud;
        }
        for device in other.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
    }

    /// Whether a USB device was remembered by the user.
    pub fn is_remembered(&self, vid: u16, pid: u16) -> bool {
        self.port.usb_device.iter().any(|d| d.matches(vid, pid))
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<PathBuf> {
        let device = UsbDevice { vid, pid };
        let path = Self::ports_file_path()?;

        if self.port.usb_device.contains(&device) {
            return Ok(path);
        }
        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(&self.port)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(path)
    }

    /// Local ports file when the project has local config, global otherwise.
    fn ports_file_path() -> anyhow::Result<PathBuf> {
        if Path::new(LOCAL_PORTS_CONFIG).exists() || Path::new(LOCAL_CONFIG).exists() {
            return Ok(PathBuf::from(LOCAL_PORTS_CONFIG));
        }
        match Self::global_config_dir() {
            Some(global_dir) => {
                fs::create_dir_all(&global_dir)?;
                Ok(global_dir.join("ports.toml"))
            },
            None => Ok(PathBuf::from(LOCAL_PORTS_CONFIG)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.flash.chip.is_none());
        assert!(config.flash.offset.is_none());
        assert!(config.flasher.candidates.is_empty());
    }

    // ---- UsbDevice ----

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x1A86,
            pid: 0x55D4,
        };
        assert!(device.matches(0x1A86, 0x55D4));
        assert!(!device.matches(0x1A86, 0x7523));
        assert!(!device.matches(0x10C4, 0x55D4));
    }

    #[test]
    fn test_is_remembered() {
        let mut config = Config::default();
        config.port.usb_device.push(UsbDevice { vid: 0x2E8A, pid: 0x000A });
        assert!(config.is_remembered(0x2E8A, 0x000A));
        assert!(!config.is_remembered(0x303A, 0x1001));
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_serial_and_chip() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        other.flash.chip = Some("esp32s3".to_string());

        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.flash.chip.as_deref(), Some("esp32s3"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.port.connection.baud = Some(115200);
        base.flash.offset = Some("0x10000".to_string());
        base.flasher.candidates = vec!["esptool".to_string()];

        base.merge(Config::default());

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.connection.baud, Some(115200));
        assert_eq!(base.flash.offset.as_deref(), Some("0x10000"));
        assert_eq!(base.flasher.candidates, vec!["esptool"]);
    }

    #[test]
    fn test_config_merge_usb_devices_dedup() {
        let mut base = Config::default();
        base.port.usb_device.push(UsbDevice { vid: 0x1A86, pid: 0x7523 });

        let mut other = Config::default();
        other.port.usb_device.push(UsbDevice { vid: 0x1A86, pid: 0x7523 });
        other.port.usb_device.push(UsbDevice { vid: 0x10C4, pid: 0xEA60 });

        base.merge(other);
        assert_eq!(base.port.usb_device.len(), 2);
    }

    #[test]
    fn test_config_merge_candidates_replace() {
        let mut base = Config::default();
        base.flasher.candidates = vec!["esptool".to_string(), "esptool.py".to_string()];

        let mut other = Config::default();
        other.flasher.candidates = vec!["/opt/esp/esptool".to_string()];

        base.merge(other);
        assert_eq!(base.flasher.candidates, vec!["/opt/esp/esptool"]);
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port.connection]
serial = "/dev/ttyACM0"
baud = 460800

[[port.usb_device]]
vid = 12346
pid = 4097

[flash]
chip = "esp32c3"
offset = "0x10000"
before = "default_reset"
after = "no_reset"

[flasher]
candidates = ["esptool", "python3 -m esptool"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.port.connection.baud, Some(460800));
        assert_eq!(config.port.usb_device, vec![UsbDevice { vid: 0x303A, pid: 0x1001 }]);
        assert_eq!(config.flash.chip.as_deref(), Some("esp32c3"));
        assert_eq!(config.flash.offset.as_deref(), Some("0x10000"));
        assert_eq!(config.flash.before.as_deref(), Some("default_reset"));
        assert_eq!(config.flash.after.as_deref(), Some("no_reset"));
        assert_eq!(config.flasher.candidates.len(), 2);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.flash.chip.is_none());
        assert!(config.flasher.candidates.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[flash\nchip = ");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("TOML"));
    }

    #[test]
    fn test_port_config_toml_roundtrip() {
        let mut port = PortConfig::default();
        port.connection.serial = Some("COM3".to_string());
        port.usb_device.push(UsbDevice { vid: 0x10C4, pid: 0xEA60 });
        port.usb_device.push(UsbDevice { vid: 0x0403, pid: 0x6001 });

        let serialized = toml::to_string_pretty(&port).unwrap();
        let deserialized: PortConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(deserialized.usb_device.len(), 2);
    }

    // ---- load_from_path ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("espflow.toml");
        fs::write(
            &path,
            r#"
[port.connection]
serial = "/dev/ttyUSB1"
[flash]
chip = "esp32"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.flash.chip.as_deref(), Some("esp32"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[port.connection\nserial = 1").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let s = p.to_string_lossy();
            assert!(s.contains("espflow"));
            assert!(s.ends_with("config.toml"));
        }
    }
}
