//! Configuration file support for iapflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (IAPFLASH_PORT, IAPFLASH_BAUD)
//! 3. Local config file (./iapflash.toml)
//! 4. Global config file (e.g. ~/.config/iapflash/config.toml)
//!
//! `--config <PATH>` replaces 3 and 4 with a single file.

use directories::ProjectDirs;
use iapflash::TransferConfig;
use iapflash::image::PAYLOAD_SIZE_ADVISORY;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "iapflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Transfer timing overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSection {
    /// Overall time to wait for the bootloader to request the file.
    pub sync_timeout_secs: Option<u64>,
    /// Per-attempt data frame acknowledge timeout.
    pub data_ack_timeout_secs: Option<u64>,
    /// Transmissions per data frame.
    pub data_attempts: Option<u32>,
}

/// Packing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackConfig {
    /// Payload size above which `pack` asks for confirmation.
    pub size_limit: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferSection,
    /// Pack configuration.
    #[serde(default)]
    pub pack: PackConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
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
                    warn!(
                        "Failed to parse TOML config file {}: {}",
                        path.display(),
                        e
                    );
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
        ProjectDirs::from("", "", "iapflash").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other
            .connection
            .port
            .is_some()
        {
            self.connection
                .port = other
                .connection
                .port;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.connection
                .baud = other
                .connection
                .baud;
        }

        let transfer = other.transfer;
        self.transfer.sync_timeout_secs = transfer
            .sync_timeout_secs
            .or(self.transfer.sync_timeout_secs);
        self.transfer.data_ack_timeout_secs = transfer
            .data_ack_timeout_secs
            .or(self.transfer.data_ack_timeout_secs);
        self.transfer.data_attempts = transfer
            .data_attempts
            .or(self.transfer.data_attempts);

        if other
            .pack
            .size_limit
            .is_some()
        {
            self.pack
                .size_limit = other
                .pack
                .size_limit;
        }
    }

    /// Protocol timing with the configured overrides applied.
    pub fn transfer_config(&self) -> TransferConfig {
        let mut config = TransferConfig::default();
        if let Some(secs) = self.transfer.sync_timeout_secs {
            config.sync_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.transfer.data_ack_timeout_secs {
            config.data_ack_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.transfer.data_attempts {
            // Zero attempts would fail every frame without sending it.
            config.data_attempts = attempts.max(1);
        }
        config
    }

    /// Payload size that triggers the oversize confirmation.
    pub fn size_limit(&self) -> usize {
        self.pack
            .size_limit
            .unwrap_or(PAYLOAD_SIZE_ADVISORY)
    }
}
