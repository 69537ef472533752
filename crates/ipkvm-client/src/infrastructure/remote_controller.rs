//! `DeviceController` that forwards every call over the bridge's realtime
//! event channel.
//!
//! ```text
//! RemoteController ──ClientEvent JSON──► writer task ──► WebSocket ──► bridge
//!        ▲                                                  │
//!        └── pending info / link state ◄── reader task ◄────┘
//! ```
//!
//! Fire-and-forget calls (keyboard, mouse) succeed once the event is queued;
//! the bridge only answers them when something went wrong, and those errors
//! are logged.  `get_info` waits for `device:info` with a bounded timeout and
//! allows one outstanding request at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use ipkvm_core::{
    AbsoluteMouseReport, DeviceController, DeviceError, InfoPacket, KeyboardReport,
    RelativeMouseReport,
};
use ipkvm_server::domain::messages::{
    ClientEvent, DeviceStatusPayload, ErrorCode, GetInfoPayload, KeyboardPayload,
    MouseAbsolutePayload, MouseRelativePayload, ServerEvent,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Upper bound on an outstanding `get_info`.
pub const INFO_TIMEOUT: Duration = Duration::from_secs(2);

const ADMISSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("bridge rejected the session ({}): {message}", .code.as_str())]
    Rejected { code: ErrorCode, message: String },

    #[error("bridge closed the channel before admitting us")]
    Closed,

    #[error("no admission from the bridge within {0:?}")]
    AdmissionTimeout(Duration),

    #[error("websocket error: {0}")]
    Ws(#[from] WsError),
}

type InfoReply = oneshot::Sender<Result<InfoPacket, DeviceError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RemoteController {
    outbound: mpsc::UnboundedSender<WsMessage>,
    pending_info: Arc<Mutex<Option<InfoReply>>>,
    /// Serializes `get_info` callers.
    info_turn: tokio::sync::Mutex<()>,
    link_open: Arc<AtomicBool>,
    status: DeviceStatusPayload,
    info_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteController {
    /// Connects to `url` (e.g. `ws://kvm.local:3000/ws`) and waits for admission.
    pub async fn connect(url: &str) -> Result<Self, RemoteError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|source| RemoteError::Connect {
                url: url.to_string(),
                source,
            })?;
        Self::attach(ws).await
    }

    /// Takes over an established WebSocket and waits for admission.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Rejected`] when the bridge is full, [`RemoteError::Closed`]
    /// or [`RemoteError::AdmissionTimeout`] when no `device:status` arrives.
    pub async fn attach<S>(ws: WebSocketStream<S>) -> Result<Self, RemoteError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();

        let status = tokio::time::timeout(ADMISSION_TIMEOUT, wait_for_admission(&mut stream))
            .await
            .map_err(|_| RemoteError::AdmissionTimeout(ADMISSION_TIMEOUT))??;
        info!(
            "admitted by bridge: serial={} video={} link={}",
            status.serial_port,
            status.video_device,
            if status.connected { "up" } else { "down" }
        );

        let link_open = Arc::new(AtomicBool::new(status.connected));
        let pending_info = Arc::new(Mutex::new(None));

        let (outbound, mut queue) = mpsc::unbounded_channel::<WsMessage>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = queue.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!("event channel write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        let reader = tokio::spawn(read_events(
            stream,
            Arc::clone(&pending_info),
            Arc::clone(&link_open),
        ));

        Ok(Self {
            outbound,
            pending_info,
            info_turn: tokio::sync::Mutex::new(()),
            link_open,
            status,
            info_timeout: INFO_TIMEOUT,
            tasks: vec![writer, reader],
        })
    }

    pub fn with_info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    /// The `device:status` received on admission.
    pub fn admission_status(&self) -> &DeviceStatusPayload {
        &self.status
    }

    fn send_event(&self, event: &ClientEvent) -> Result<(), DeviceError> {
        let json = serde_json::to_string(event).map_err(DeviceError::transport)?;
        self.outbound
            .send(WsMessage::Text(json))
            .map_err(|_| DeviceError::Unavailable)
    }
}

impl Drop for RemoteController {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl DeviceController for RemoteController {
    async fn get_info(&self) -> Result<InfoPacket, DeviceError> {
        let _turn = self.info_turn.lock().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        *lock(&self.pending_info) = Some(reply_tx);
        if let Err(e) = self.send_event(&ClientEvent::GetInfo(GetInfoPayload {})) {
            lock(&self.pending_info).take();
            return Err(e);
        }

        match tokio::time::timeout(self.info_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DeviceError::Unavailable),
            Err(_) => {
                lock(&self.pending_info).take();
                Err(DeviceError::Timeout)
            }
        }
    }

    async fn send_keyboard(&self, report: KeyboardReport) -> Result<(), DeviceError> {
        self.send_event(&ClientEvent::Keyboard(KeyboardPayload {
            modifiers: report.modifiers.0,
            keys: report.keys.to_vec(),
        }))
    }

    async fn send_mouse_absolute(&self, report: AbsoluteMouseReport) -> Result<(), DeviceError> {
        let (x, y) = report.normalized();
        self.send_event(&ClientEvent::MouseAbsolute(MouseAbsolutePayload {
            buttons: report.buttons.0,
            x,
            y,
            scroll: i32::from(report.scroll),
        }))
    }

    async fn send_mouse_relative(&self, report: RelativeMouseReport) -> Result<(), DeviceError> {
        self.send_event(&ClientEvent::MouseRelative(MouseRelativePayload {
            buttons: report.buttons.0,
            x: f64::from(report.dx),
            y: f64::from(report.dy),
            scroll: i32::from(report.scroll),
        }))
    }

    fn is_link_open(&self) -> bool {
        self.link_open.load(Ordering::Acquire)
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

async fn wait_for_admission<R>(stream: &mut R) -> Result<DeviceStatusPayload, RemoteError>
where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::DeviceStatus(status)) => return Ok(status),
                Ok(ServerEvent::Error(e)) => {
                    return Err(RemoteError::Rejected {
                        code: e.code,
                        message: e.message,
                    })
                }
                Ok(other) => debug!("ignoring {other:?} before admission"),
                Err(e) => debug!("ignoring unparseable frame before admission: {e}"),
            },
            WsMessage::Close(_) => return Err(RemoteError::Closed),
            _ => {}
        }
    }
    Err(RemoteError::Closed)
}

async fn read_events<R>(
    mut stream: R,
    pending_info: Arc<Mutex<Option<InfoReply>>>,
    link_open: Arc<AtomicBool>,
) where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("event channel read failed: {e}");
                break;
            }
        };
        let event = match serde_json::from_str::<ServerEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!("unparseable event from bridge: {e}");
                continue;
            }
        };

        match event {
            ServerEvent::DeviceStatus(status) => {
                link_open.store(status.connected, Ordering::Release);
            }
            ServerEvent::DeviceInfo(payload) => {
                let result = payload.to_info_packet().ok_or_else(|| DeviceError::Remote {
                    code: ErrorCode::GetInfoError.as_str().to_string(),
                    message: format!("unrecognised chip version '{}'", payload.chip_version),
                });
                match lock(&pending_info).take() {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => debug!("device:info with no request pending"),
                }
            }
            ServerEvent::Error(e) if e.code == ErrorCode::GetInfoError => {
                let error = DeviceError::Remote {
                    code: e.code.as_str().to_string(),
                    message: e.message,
                };
                match lock(&pending_info).take() {
                    Some(reply) => {
                        let _ = reply.send(Err(error));
                    }
                    None => warn!("bridge reported {error}"),
                }
            }
            ServerEvent::Error(e) => {
                warn!("bridge reported {}: {}", e.code.as_str(), e.message);
            }
        }
    }

    link_open.store(false, Ordering::Release);
    if let Some(reply) = lock(&pending_info).take() {
        let _ = reply.send(Err(DeviceError::Unavailable));
    }
    info!("event channel closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ipkvm_server::domain::messages::{DeviceInfoPayload, ErrorPayload};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    type Ws = WebSocketStream<DuplexStream>;

    async fn pair() -> (Ws, Ws) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let bridge = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (bridge, client)
    }

    async fn send(ws: &mut Ws, event: &ServerEvent) {
        ws.send(WsMessage::Text(serde_json::to_string(event).unwrap()))
            .await
            .unwrap();
    }

    async fn recv_json(ws: &mut Ws) -> serde_json::Value {
        loop {
            if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    fn status(connected: bool) -> ServerEvent {
        ServerEvent::DeviceStatus(DeviceStatusPayload {
            connected,
            serial_port: "/dev/ttyUSB0".to_string(),
            video_device: "/dev/video0".to_string(),
        })
    }

    async fn admitted() -> (RemoteController, Ws) {
        let (mut bridge, client) = pair().await;
        send(&mut bridge, &status(true)).await;
        let controller = RemoteController::attach(client).await.unwrap();
        (controller, bridge)
    }

    #[tokio::test]
    async fn test_admission_sets_link_state() {
        let (controller, _bridge) = admitted().await;
        assert!(controller.is_link_open());
        assert_eq!(controller.admission_status().serial_port, "/dev/ttyUSB0");
    }

    #[tokio::test]
    async fn test_rejection_surfaces_error_code() {
        // Arrange
        let (mut bridge, client) = pair().await;
        send(
            &mut bridge,
            &ServerEvent::error(ErrorCode::MaxClients, "Maximum number of clients reached"),
        )
        .await;

        // Act
        let result = RemoteController::attach(client).await;

        // Assert
        assert!(matches!(
            result,
            Err(RemoteError::Rejected {
                code: ErrorCode::MaxClients,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_keyboard_report_is_forwarded_as_event() {
        let (controller, mut bridge) = admitted().await;
        let report = KeyboardReport::new(0x01, &[0x04, 0x05, 0, 0, 0, 0]).unwrap();

        controller.send_keyboard(report).await.unwrap();
        let sent = recv_json(&mut bridge).await;

        assert_eq!(sent["event"], "keyboard:data");
        assert_eq!(sent["data"]["modifiers"], 1);
        assert_eq!(sent["data"]["keys"], serde_json::json!([4, 5, 0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn test_absolute_report_is_sent_normalized() {
        let (controller, mut bridge) = admitted().await;
        let report = AbsoluteMouseReport::from_normalized(1, 0.5, 0.25, 0);

        controller.send_mouse_absolute(report).await.unwrap();
        let sent = recv_json(&mut bridge).await;

        assert_eq!(sent["event"], "mouse:absolute");
        assert_eq!(sent["data"]["x"], 0.5);
        assert_eq!(sent["data"]["y"], 0.25);
        assert_eq!(sent["data"]["buttons"], 1);
    }

    #[tokio::test]
    async fn test_get_info_resolves_from_device_info_event() {
        // Arrange
        let (controller, mut bridge) = admitted().await;
        let responder = tokio::spawn(async move {
            let request = recv_json(&mut bridge).await;
            assert_eq!(request["event"], "device:getInfo");
            let info = InfoPacket::from_payload(&[0x33, 0x01, 0x04]).unwrap();
            send(&mut bridge, &ServerEvent::DeviceInfo(DeviceInfoPayload::from(info))).await;
            bridge
        });

        // Act
        let info = controller.get_info().await.unwrap();

        // Assert
        let _bridge = responder.await.unwrap();
        assert_eq!(info.chip_version(), "V1.3");
        assert!(info.is_connected);
        assert!(info.scroll_lock);
    }

    #[tokio::test]
    async fn test_get_info_error_event_is_returned() {
        let (controller, mut bridge) = admitted().await;
        let responder = tokio::spawn(async move {
            recv_json(&mut bridge).await;
            send(
                &mut bridge,
                &ServerEvent::Error(ErrorPayload {
                    message: "No response from device".to_string(),
                    code: ErrorCode::GetInfoError,
                }),
            )
            .await;
            bridge
        });

        let result = controller.get_info().await;

        let _bridge = responder.await.unwrap();
        assert!(matches!(
            result,
            Err(DeviceError::Remote { ref code, .. }) if code == "GET_INFO_ERROR"
        ));
    }

    #[tokio::test]
    async fn test_get_info_times_out_without_reply() {
        let (controller, _bridge) = admitted().await;
        let controller = controller.with_info_timeout(Duration::from_millis(50));

        let result = controller.get_info().await;

        assert!(matches!(result, Err(DeviceError::Timeout)));
    }

    #[tokio::test]
    async fn test_closing_channel_cancels_pending_info_and_drops_link() {
        let (controller, bridge) = admitted().await;
        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(bridge);
        });

        let result = controller.get_info().await;

        closer.await.unwrap();
        assert!(matches!(result, Err(DeviceError::Unavailable)));
        assert!(!controller.is_link_open());
    }

    #[tokio::test]
    async fn test_status_update_changes_link_state() {
        let (controller, mut bridge) = admitted().await;

        send(&mut bridge, &status(false)).await;

        for _ in 0..50 {
            if !controller.is_link_open() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("link state never followed device:status");
    }
}
