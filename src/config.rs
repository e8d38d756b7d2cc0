//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the nav-relay.toml file.
//! It provides a centralized way to configure the notification source, the
//! peripheral link and the display preferences pushed to the peripheral.

use crate::backend::ble_max_payload;
use crate::link::{BackendKind, LinkTimings};
use crate::protocol::{self, DeviceId, Preferences};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name
pub const CONFIG_FILE: &str = "nav-relay.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration loaded from nav-relay.toml
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Notification source and icon settings
    #[serde(default)]
    pub scraper: ScraperConfig,
    /// Peripheral link settings
    #[serde(default)]
    pub transport: TransportConfig,
    /// Pushed to the peripheral on connect
    #[serde(default)]
    pub preferences: Preferences,
}

/// Which notification to read and how
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Package name of the map application (substring match)
    pub source_package: String,
    /// Id of the navigation notification within that package
    pub notification_id: i32,
    /// Debounce window for rapid notification updates
    pub debounce_ms: u64,
    /// Turn icon size on the peripheral
    pub icon_width: u32,
    pub icon_height: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            source_package: "com.google.android.apps.maps".to_string(),
            notification_id: 1,
            debounce_ms: 500,
            icon_width: 32,
            icon_height: 32,
        }
    }
}

impl ScraperConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Peripheral link configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub backend: BackendKind,
    /// Last known peripheral: BLE address or serial device path
    pub device: Option<String>,
    pub ping_interval_secs: u64,
    pub first_ping_delay_ms: u64,
    pub reconnect_interval_secs: u64,
    /// Bound on opening the channel; expiry counts as link lost
    pub connect_timeout_secs: u64,
    /// Negotiated ATT MTU (BLE only)
    pub mtu: usize,
    /// Reconnect automatically while disconnected
    pub background: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            backend: BackendKind::Serial,
            device: None,
            ping_interval_secs: 25,
            first_ping_delay_ms: 1000,
            reconnect_interval_secs: 15,
            connect_timeout_secs: 10,
            mtu: 247,
            background: true,
        }
    }
}

impl TransportConfig {
    pub fn timings(&self) -> LinkTimings {
        LinkTimings {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            first_ping_delay: Duration::from_millis(self.first_ping_delay_ms),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.device.as_deref().map(DeviceId::new)
    }
}

impl Config {
    /// Load configuration from nav-relay.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    log::info!(
                        "Loaded configuration from {} ({:?} backend)",
                        path.display(),
                        config.transport.backend
                    );
                    if !config.icon_fits_mtu() {
                        log::warn!(
                            "{}x{} icons need {} byte writes, more than the {} bytes MTU {} allows; icons will not be delivered",
                            config.scraper.icon_width,
                            config.scraper.icon_height,
                            protocol::icon_payload_len(config.scraper.icon_width, config.scraper.icon_height),
                            ble_max_payload(config.transport.mtu),
                            config.transport.mtu
                        );
                    }
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config file format: {}", e);
                    log::warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found at {}, using default configuration", path.display());
                Self::default()
            }
        }
    }

    /// Whether one icon write fits the BLE MTU. Serial links have no limit.
    pub fn icon_fits_mtu(&self) -> bool {
        if self.transport.backend != BackendKind::Ble {
            return true;
        }
        let needed = protocol::icon_payload_len(self.scraper.icon_width, self.scraper.icon_height);
        needed <= ble_max_payload(self.transport.mtu)
    }

    /// Save current configuration to nav-relay.toml
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(CONFIG_FILE)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}
