//! JSON events carried by the realtime channel.
//!
//! Every WebSocket text frame is one object with an `"event"` name and an
//! optional `"data"` payload:
//!
//! ```json
//! {"event":"keyboard:data","data":{"modifiers":2,"keys":[4,0,0,0,0,0]}}
//! {"event":"device:info","data":{"chipVersion":"V1.1","isConnected":true,"numLock":true,"capsLock":false,"scrollLock":true}}
//! ```
//!
//! Inbound events are parsed in two steps (envelope, then payload) so that a
//! bad payload can still be answered with the error code of the event it was
//! meant to be.

use ipkvm_core::InfoPacket;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ── Event names ───────────────────────────────────────────────────────────────

pub const EVENT_KEYBOARD: &str = "keyboard:data";
pub const EVENT_MOUSE_ABSOLUTE: &str = "mouse:absolute";
pub const EVENT_MOUSE_RELATIVE: &str = "mouse:relative";
pub const EVENT_GET_INFO: &str = "device:getInfo";

// ── Client → server ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardPayload {
    pub modifiers: u8,
    /// Must hold exactly six HID usage codes; validated by the relay.
    pub keys: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseAbsolutePayload {
    #[serde(default)]
    pub buttons: u8,
    /// Normalized to `[0, 1]`.
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub scroll: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseRelativePayload {
    #[serde(default)]
    pub buttons: u8,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub scroll: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInfoPayload {}

/// Everything an operator can send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "keyboard:data")]
    Keyboard(KeyboardPayload),
    #[serde(rename = "mouse:absolute")]
    MouseAbsolute(MouseAbsolutePayload),
    #[serde(rename = "mouse:relative")]
    MouseRelative(MouseRelativePayload),
    #[serde(rename = "device:getInfo")]
    GetInfo(GetInfoPayload),
}

/// Which kind of inbound event a frame claimed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    Keyboard,
    MouseAbsolute,
    MouseRelative,
    GetInfo,
}

impl ClientEventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            EVENT_KEYBOARD => Some(Self::Keyboard),
            EVENT_MOUSE_ABSOLUTE => Some(Self::MouseAbsolute),
            EVENT_MOUSE_RELATIVE => Some(Self::MouseRelative),
            EVENT_GET_INFO => Some(Self::GetInfo),
            _ => None,
        }
    }

    /// Error code reported when handling this kind of event fails.
    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::Keyboard => ErrorCode::KeyboardError,
            Self::MouseAbsolute | Self::MouseRelative => ErrorCode::MouseError,
            Self::GetInfo => ErrorCode::GetInfoError,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("frame is not an event object: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("invalid {kind:?} payload: {source}")]
    InvalidPayload {
        kind: ClientEventKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

impl ClientEvent {
    /// Parses one inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, EventParseError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(EventParseError::Malformed)?;
        let kind = ClientEventKind::from_name(&envelope.event)
            .ok_or_else(|| EventParseError::UnknownEvent(envelope.event.clone()))?;
        let data = envelope
            .data
            .unwrap_or_else(|| Value::Object(Default::default()));
        let invalid = |source| EventParseError::InvalidPayload { kind, source };

        Ok(match kind {
            ClientEventKind::Keyboard => {
                ClientEvent::Keyboard(serde_json::from_value(data).map_err(invalid)?)
            }
            ClientEventKind::MouseAbsolute => {
                ClientEvent::MouseAbsolute(serde_json::from_value(data).map_err(invalid)?)
            }
            ClientEventKind::MouseRelative => {
                ClientEvent::MouseRelative(serde_json::from_value(data).map_err(invalid)?)
            }
            ClientEventKind::GetInfo => ClientEvent::GetInfo(GetInfoPayload {}),
        })
    }

    pub fn kind(&self) -> ClientEventKind {
        match self {
            ClientEvent::Keyboard(_) => ClientEventKind::Keyboard,
            ClientEvent::MouseAbsolute(_) => ClientEventKind::MouseAbsolute,
            ClientEvent::MouseRelative(_) => ClientEventKind::MouseRelative,
            ClientEvent::GetInfo(_) => ClientEventKind::GetInfo,
        }
    }
}

// ── Server → client ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MaxClients,
    AddClientFailed,
    KeyboardError,
    MouseError,
    GetInfoError,
}

impl ErrorCode {
    /// Wire spelling, e.g. `MAX_CLIENTS`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MaxClients => "MAX_CLIENTS",
            ErrorCode::AddClientFailed => "ADD_CLIENT_FAILED",
            ErrorCode::KeyboardError => "KEYBOARD_ERROR",
            ErrorCode::MouseError => "MOUSE_ERROR",
            ErrorCode::GetInfoError => "GET_INFO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusPayload {
    pub connected: bool,
    pub serial_port: String,
    pub video_device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoPayload {
    pub chip_version: String,
    pub is_connected: bool,
    pub num_lock: bool,
    pub caps_lock: bool,
    pub scroll_lock: bool,
}

impl From<InfoPacket> for DeviceInfoPayload {
    fn from(info: InfoPacket) -> Self {
        Self {
            chip_version: info.chip_version(),
            is_connected: info.is_connected,
            num_lock: info.num_lock,
            caps_lock: info.caps_lock,
            scroll_lock: info.scroll_lock,
        }
    }
}

impl DeviceInfoPayload {
    /// Rebuilds the chip-level view; `None` if the version text is not `V<major>.<minor>`.
    pub fn to_info_packet(&self) -> Option<InfoPacket> {
        Some(InfoPacket {
            version_byte: InfoPacket::encode_version(&self.chip_version)?,
            is_connected: self.is_connected,
            num_lock: self.num_lock,
            caps_lock: self.caps_lock,
            scroll_lock: self.scroll_lock,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: ErrorCode,
}

/// Everything the bridge pushes to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "device:status")]
    DeviceStatus(DeviceStatusPayload),
    #[serde(rename = "device:info")]
    DeviceInfo(DeviceInfoPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
            code,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
