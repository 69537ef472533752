//! Optional TOML configuration file.
//!
//! Every key is optional; a missing key takes the built-in default.  CLI
//! flags and environment variables are layered on top in `main.rs`.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [serial]
//! device = "/dev/ttyUSB0"
//! baud_rate = 57600
//!
//! [video]
//! device = "/dev/video0"
//! resolution = "1920x1080"
//! fps = 30
//! quality = 80
//! capture_program = "ffmpeg"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    Resolution, ResolutionError, SerialConfig, ServerConfig, VideoConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("invalid bind host '{0}'")]
    Host(String),
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub video: VideoSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSection {
    #[serde(default = "default_serial_device")]
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSection {
    #[serde(default = "default_video_device")]
    pub device: String,
    /// `WIDTHxHEIGHT`; validated when converting to [`ServerConfig`].
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_capture_program")]
    pub capture_program: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_serial_device() -> String {
    SerialConfig::default().device
}
fn default_baud_rate() -> u32 {
    SerialConfig::default().baud_rate
}
fn default_video_device() -> String {
    VideoConfig::default().device
}
fn default_resolution() -> String {
    VideoConfig::default().resolution.to_string()
}
fn default_fps() -> u32 {
    VideoConfig::default().fps
}
fn default_quality() -> u32 {
    VideoConfig::default().quality
}
fn default_capture_program() -> String {
    VideoConfig::default().capture_program
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: default_serial_device(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            device: default_video_device(),
            resolution: default_resolution(),
            fps: default_fps(),
            quality: default_quality(),
            capture_program: default_capture_program(),
        }
    }
}

impl FileConfig {
    /// Validates the file contents and builds the runtime configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Host`] or [`ConfigError::Resolution`] on malformed values.
    pub fn into_server_config(self) -> Result<ServerConfig, ConfigError> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::Host(self.server.host.clone()))?;
        let resolution: Resolution = self.video.resolution.parse()?;
        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, self.server.port),
            serial: SerialConfig {
                device: self.serial.device,
                baud_rate: self.serial.baud_rate,
            },
            video: VideoConfig {
                device: self.video.device,
                resolution,
                fps: self.video.fps,
                quality: self.video.quality,
                capture_program: self.video.capture_program,
            },
        })
    }
}

/// Reads and parses the file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// it is not valid TOML for this schema.
pub fn load_from_path(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
