//! The `DeviceController` capability.
//!
//! Everything that drives the HID chip does so through this trait.  Two
//! implementations exist and one is chosen at construction time:
//!
//! - a direct controller that owns the local serial link (bridge server,
//!   or the CLI with `--serial`), and
//! - a relay-forwarded controller that sends events to a running bridge over
//!   its realtime channel (CLI with `--server`).

use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::hid::{AbsoluteMouseReport, HidError, KeyboardReport, RelativeMouseReport};
use crate::protocol::codec::ProtocolError;
use crate::protocol::info::{InfoError, InfoPacket};

/// Errors surfaced by any [`DeviceController`].
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    InvalidPayload(#[from] HidError),

    /// The chip did not answer within the read window.
    #[error("No response from device")]
    NoResponse,

    #[error("unusable device response: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("bad device info: {0}")]
    Info(#[from] InfoError),

    /// The underlying link failed (serial I/O, WebSocket, ...).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),

    #[error("device request timed out")]
    Timeout,

    /// The component serializing device access has shut down.
    #[error("device controller is unavailable")]
    Unavailable,

    /// The relay answered with an error event.
    #[error("relay error {code}: {message}")]
    Remote { code: String, message: String },
}

impl DeviceError {
    pub fn transport<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Drives a HID-emulation chip.
///
/// Reports are validated by construction, so implementations only move bytes.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Queries firmware version, host connection, and lock LEDs.
    async fn get_info(&self) -> Result<InfoPacket, DeviceError>;

    async fn send_keyboard(&self, report: KeyboardReport) -> Result<(), DeviceError>;

    async fn send_mouse_absolute(&self, report: AbsoluteMouseReport) -> Result<(), DeviceError>;

    async fn send_mouse_relative(&self, report: RelativeMouseReport) -> Result<(), DeviceError>;

    /// Whether the path to the chip is currently up.  Never blocks on I/O.
    fn is_link_open(&self) -> bool;
}
