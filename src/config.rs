// src/config.rs

//! Configuration for the shared-memory display driver.
//!
//! The structs here deserialize from a JSON file (named by `WLSHM_CONFIG`)
//! and every section falls back to defaults, so an empty object is a valid
//! configuration. The values play the role of the host's screen, monitor and
//! device sections.

use anyhow::{Context, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "WLSHM_CONFIG";

/// Driver name matched against device sections during probe.
pub const DRIVER_NAME: &str = "wayland";

/// Process-wide configuration, loaded on first use.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match std::env::var_os(CONFIG_ENV_VAR) {
    Some(path) => Config::load(Path::new(&path)).unwrap_or_else(|e| {
        warn!("Falling back to default configuration: {:#}", e);
        Config::default()
    }),
    None => Config::default(),
});

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Screen geometry, depth and modes.
    pub screen: ScreenConfig,
    /// Shared-memory backing for window buffers.
    pub shm: ShmConfig,
    /// Host "Device" sections; probe claims the ones using this driver.
    pub devices: Vec<DeviceSection>,
    /// Logging settings for the binary.
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

// --- Screen Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Virtual screen width in pixels.
    pub virtual_width: u32,
    /// Virtual screen height in pixels.
    pub virtual_height: u32,
    /// Colour depth. Only 24, 30 and 32 are supported.
    pub depth: u8,
    /// Monitor resolution; 96 when unset.
    pub dpi: Option<u32>,
    /// Candidate modes, validated against the virtual size.
    pub modes: Vec<ModeConfig>,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        ScreenConfig {
            virtual_width: 1024,
            virtual_height: 768,
            depth: 24,
            dpi: None,
            modes: vec![ModeConfig {
                name: "1024x768".to_string(),
                width: 1024,
                height: 768,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModeConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

// --- Shared Memory Configuration ---

/// How anonymous shared-memory segments are created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ShmBackend {
    /// `mkstemp` on `template`, unlinked once mapped.
    #[default]
    TempFile,
    /// `memfd_create`; never has a path.
    Memfd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    pub backend: ShmBackend,
    /// mkstemp template; must end in `XXXXXX`.
    pub template: String,
}

impl Default for ShmConfig {
    fn default() -> Self {
        ShmConfig {
            backend: ShmBackend::TempFile,
            template: "/tmp/wayland-shm-XXXXXX".to_string(),
        }
    }
}

// --- Device Sections ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceSection {
    pub identifier: String,
    pub driver: String,
    /// Free-form driver options. This driver defines none, so any entry
    /// here is reported as unused.
    pub options: BTreeMap<String, String>,
}

// --- Logging Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default env_logger filter when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}
