//! Relay: turns operator events into device commands and device answers into
//! operator events.
//!
//! The relay owns no device state.  It validates input (key-slot count,
//! coordinate scaling, delta clamping happen while building the HID report),
//! forwards the report to the [`DeviceController`], and converts any failure
//! into an `error` event with the code of the originating event.

use std::sync::Arc;
use std::time::Duration;

use ipkvm_core::{
    AbsoluteMouseReport, DeviceController, DeviceError, KeyboardReport, RelativeMouseReport,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::session_gate::SessionGate;
use crate::domain::messages::{
    ClientEvent, DeviceInfoPayload, DeviceStatusPayload, EventParseError, ServerEvent,
};

/// Upper bound on a pending info request.
pub const INFO_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Relay {
    device: Arc<dyn DeviceController>,
    gate: Arc<SessionGate>,
    serial_port: String,
    video_device: String,
    info_timeout: Duration,
}

impl Relay {
    pub fn new(
        device: Arc<dyn DeviceController>,
        gate: Arc<SessionGate>,
        serial_port: impl Into<String>,
        video_device: impl Into<String>,
    ) -> Self {
        Self {
            device,
            gate,
            serial_port: serial_port.into(),
            video_device: video_device.into(),
            info_timeout: INFO_REQUEST_TIMEOUT,
        }
    }

    pub fn with_info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    /// The `device:status` event sent right after admission.
    pub fn device_status(&self) -> ServerEvent {
        ServerEvent::DeviceStatus(DeviceStatusPayload {
            connected: self.device.is_link_open(),
            serial_port: self.serial_port.clone(),
            video_device: self.video_device.clone(),
        })
    }

    /// Handles one inbound text frame.  Returns the reply to send, if any.
    pub async fn handle_text(&self, session: Uuid, text: &str) -> Option<ServerEvent> {
        self.gate.touch(session);
        match ClientEvent::from_json(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(EventParseError::InvalidPayload { kind, source }) => {
                warn!("session {session}: rejected {kind:?} payload: {source}");
                Some(ServerEvent::error(
                    kind.error_code(),
                    format!("invalid payload: {source}"),
                ))
            }
            Err(e) => {
                warn!("session {session}: ignoring frame: {e}");
                None
            }
        }
    }

    async fn dispatch(&self, session: Uuid, event: ClientEvent) -> Option<ServerEvent> {
        let kind = event.kind();
        let outcome = match event {
            ClientEvent::Keyboard(p) => match KeyboardReport::new(p.modifiers, &p.keys) {
                Ok(report) => self.device.send_keyboard(report).await.map(|()| None),
                Err(e) => Err(DeviceError::from(e)),
            },
            ClientEvent::MouseAbsolute(p) => {
                let report = AbsoluteMouseReport::from_normalized(p.buttons, p.x, p.y, p.scroll);
                self.device.send_mouse_absolute(report).await.map(|()| None)
            }
            ClientEvent::MouseRelative(p) => {
                let report = RelativeMouseReport::new(p.buttons, p.x, p.y, p.scroll);
                self.device.send_mouse_relative(report).await.map(|()| None)
            }
            ClientEvent::GetInfo(_) => {
                match tokio::time::timeout(self.info_timeout, self.device.get_info()).await {
                    Ok(Ok(info)) => Ok(Some(ServerEvent::DeviceInfo(DeviceInfoPayload::from(
                        info,
                    )))),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(DeviceError::Timeout),
                }
            }
        };

        match outcome {
            Ok(reply) => {
                debug!("session {session}: {kind:?} handled");
                reply
            }
            Err(e) => {
                warn!("session {session}: {kind:?} failed: {e}");
                Some(ServerEvent::error(kind.error_code(), e.to_string()))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
