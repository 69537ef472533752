//! One realtime event-channel connection.
//!
//! ```text
//! Connecting ──admit──► Admitted ──device:status──► Active ──► Closed
//!      │                                             │
//!      └─ gate full: error{MAX_CLIENTS}, close       └─ disconnect / evicted
//! ```
//!
//! The gate entry is removed on every exit path from `Active`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::relay::Relay;
use crate::application::session_gate::{Admission, GateError};
use crate::domain::messages::{ErrorCode, ServerEvent};

/// Runs the session to completion.  Never returns an error; every failure is
/// logged and ends the session.
pub async fn run_event_session<S>(ws: WebSocketStream<S>, relay: Arc<Relay>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = ws.split();

    let Admission { mut evicted, .. } = match relay.gate().admit(id) {
        Ok(admission) => admission,
        Err(e) => {
            let code = match e {
                GateError::Full => ErrorCode::MaxClients,
                GateError::AlreadyAdmitted(_) => ErrorCode::AddClientFailed,
            };
            warn!("session {id}: rejected {peer}: {e}");
            let _ = send_event(&mut ws_tx, &ServerEvent::error(code, e.to_string())).await;
            let _ = ws_tx.close().await;
            return;
        }
    };
    info!("session {id}: admitted {peer}");

    if send_event(&mut ws_tx, &relay.device_status()).await.is_err() {
        debug!("session {id}: closed before device status was delivered");
        relay.gate().remove(id);
        return;
    }

    loop {
        tokio::select! {
            _ = &mut evicted => {
                info!("session {id}: evicted");
                let _ = ws_tx.close().await;
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(reply) = relay.handle_text(id, &text).await {
                        if send_event(&mut ws_tx, &reply).await.is_err() {
                            debug!("session {id}: send failed (peer gone)");
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("session {id}: peer closed");
                    break;
                }
                // Pings are answered by tungstenite on the next flush.
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                    debug!("session {id}: connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!("session {id}: websocket error: {e}");
                    break;
                }
            }
        }
    }

    relay.gate().remove(id);
    info!("session {id}: closed");
}

async fn send_event<W>(sink: &mut W, event: &ServerEvent) -> Result<(), WsError>
where
    W: Sink<WsMessage, Error = WsError> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sink.send(WsMessage::Text(json)).await,
        Err(e) => {
            error!("failed to serialize {event:?}: {e}");
            Ok(())
        }
    }
}
