//! Bridge configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is assembled once in `main.rs` (CLI flags, environment, optional TOML
//! file, defaults) and then shared read-only.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Only one operator may control the device at a time.
pub const MAX_CLIENTS: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("resolution '{0}' must look like WIDTHxHEIGHT")]
    Format(String),

    #[error("resolution '{0}' has a zero dimension")]
    Zero(String),
}

/// Capture frame size, written `1920x1080`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ResolutionError::Format(s.to_string()))?;
        let width: u32 = w
            .parse()
            .map_err(|_| ResolutionError::Format(s.to_string()))?;
        let height: u32 = h
            .parse()
            .map_err(|_| ResolutionError::Format(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ResolutionError::Zero(s.to_string()));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

/// Serial line to the HID-emulation chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 57600,
        }
    }
}

/// Capture device and encoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    pub device: String,
    pub resolution: Resolution,
    pub fps: u32,
    /// Passed to the encoder as `-q:v`.
    pub quality: u32,
    /// Executable used for capture, normally `ffmpeg`.
    pub capture_program: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            resolution: Resolution::new(1920, 1080),
            fps: 30,
            quality: 80,
            capture_program: "ffmpeg".to_string(),
        }
    }
}

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use ipkvm_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address of the HTTP / WebSocket listener.
    pub bind_addr: SocketAddr,
    pub serial: SerialConfig,
    pub video: VideoConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            serial: SerialConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
