//! Configuration file handling for camstage.
//!
//! Loads configuration from `~/.config/camstage/config.toml` or a custom
//! path. Every section has sensible defaults; a missing file is not an error.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::DriverSettings;
use crate::geometry::SafeAreaMode;
use crate::session::{CaptureConfiguration, DeviceSelection, Resolution};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub overlay: OverlaySection,
    #[serde(default)]
    pub driver: DriverSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct SharedConfig {
    /// Directory both processes share. Defaults to the local data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct CameraConfig {
    /// Stable device id to prefer; any suitable camera when unset.
    #[serde(default)]
    pub device: Option<String>,
    /// `low`, `medium`, `high`, or an explicit `WIDTHxHEIGHT`.
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            resolution: default_resolution(),
            fallback: default_fallback(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct OverlaySection {
    /// Safe-area mode the overlay is sized for.
    #[serde(default)]
    pub mode: SafeAreaMode,
}

#[derive(Debug, Deserialize)]
pub struct DriverSection {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default = "default_asset_refresh_ms")]
    pub asset_refresh_ms: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            asset_refresh_ms: default_asset_refresh_ms(),
        }
    }
}

fn default_resolution() -> String {
    "medium".to_string()
}

fn default_fallback() -> String {
    "low".to_string()
}

fn default_heartbeat_ms() -> u64 {
    1500
}

fn default_stall_timeout_ms() -> u64 {
    5000
}

fn default_asset_refresh_ms() -> u64 {
    2000
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// The shared directory both processes use.
    pub fn shared_dir(&self) -> PathBuf {
        self.shared.dir.clone().unwrap_or_else(default_shared_dir)
    }

    /// The capture configuration this file describes.
    pub fn capture_configuration(&self) -> Result<CaptureConfiguration, ConfigError> {
        Ok(CaptureConfiguration {
            device: match &self.camera.device {
                Some(id) => DeviceSelection::Id(id.clone()),
                None => DeviceSelection::Any,
            },
            resolution: parse_resolution(&self.camera.resolution)?,
            fallback: parse_resolution(&self.camera.fallback)?,
        })
    }

    /// Driver loop timing.
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            heartbeat_interval: Duration::from_millis(self.driver.heartbeat_ms),
            stall_timeout: Duration::from_millis(self.driver.stall_timeout_ms),
            asset_refresh_interval: Duration::from_millis(self.driver.asset_refresh_ms),
            ..DriverSettings::default()
        }
    }

    /// Output canvas in pixels: the virtual camera frames at the primary
    /// capture resolution.
    pub fn canvas(&self) -> Result<(u32, u32), ConfigError> {
        let r = parse_resolution(&self.camera.resolution)?;
        Ok((r.width, r.height))
    }

    pub fn safe_area_mode(&self) -> SafeAreaMode {
        self.overlay.mode
    }
}

/// Parse a resolution: a named preset or `WIDTHxHEIGHT`.
pub fn parse_resolution(value: &str) -> Result<Resolution, ConfigError> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "low" => return Ok(Resolution::LOW),
        "medium" => return Ok(Resolution::MEDIUM),
        "high" => return Ok(Resolution::HIGH),
        _ => {}
    }
    let invalid = || ConfigError::InvalidResolution(value.to_string());
    let (w, h) = normalized.split_once('x').ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok(Resolution { width, height })
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid resolution '{0}' (expected low, medium, high or WIDTHxHEIGHT)")]
    InvalidResolution(String),
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("camstage").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/camstage/config.toml")
        })
}

/// Default shared directory when the config doesn't name one.
pub fn default_shared_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("camstage").join("shared"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share/camstage/shared")
        })
}

/// Annotated template written by `camstage config init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# camstage configuration

[shared]
# Directory both processes share. Defaults to the local data dir.
# dir = "/path/to/shared"

[camera]
# Stable device id to prefer; any suitable camera when unset.
# device = "0"
# low (640x480), medium (1280x720), high (1920x1080) or WIDTHxHEIGHT.
resolution = "medium"
fallback = "low"

[overlay]
# Safe-area mode: none, aggressive, balanced, conservative, compact.
mode = "balanced"

[driver]
heartbeat_ms = 1500
stall_timeout_ms = 5000
asset_refresh_ms = 2000
"#;
