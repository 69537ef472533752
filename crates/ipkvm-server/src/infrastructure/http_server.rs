//! HTTP surface: accept loop, request routing, and the endpoints.
//!
//! | Request | Response |
//! |---|---|
//! | any path with `Upgrade: websocket` | realtime event channel ([`run_event_session`]) |
//! | `GET /health` | JSON status document |
//! | `GET /api/devices/serial` | `{ports: [...]}`, or `500 {error}` |
//! | `GET /stream/mjpeg` | `multipart/x-mixed-replace` JPEG stream |
//! | anything else | `404` |
//!
//! Only the request head is parsed (with `httparse`); none of the endpoints
//! take a body.  Each connection runs in its own task and serves exactly one
//! request.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::application::relay::Relay;
use crate::domain::config::ServerConfig;
use crate::infrastructure::device_link::{DeviceLink, LinkStatus};
use crate::infrastructure::event_session::run_event_session;
use crate::infrastructure::serial::{PortInfo, PortLister};
use crate::infrastructure::video_pipeline::{PipelineEvent, PipelineStatus, VideoPipeline};

/// Multipart boundary token, as announced in `Content-Type`.
pub const MJPEG_BOUNDARY: &str = "--FRAME";

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEAD_SIZE: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;

/// Everything a connection handler needs, constructed once at startup.
pub struct ServerContext {
    pub config: ServerConfig,
    pub relay: Arc<Relay>,
    pub pipeline: Arc<VideoPipeline>,
    pub link: Arc<DeviceLink>,
    pub ports: Arc<dyn PortLister>,
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Binds `ctx.config.bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(ctx: Arc<ServerContext>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(ctx.config.bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", ctx.config.bind_addr))?;
    info!("IP-KVM bridge listening on {}", ctx.config.bind_addr);
    serve(listener, ctx, running).await
}

/// Accept loop over an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the flag is re-checked while idle.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("connection from {peer}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, ctx).await {
                        debug!("connection {peer} ended with error: {e:#}");
                    }
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
    Ok(())
}

// ── Request head ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    /// `Sec-WebSocket-Key`, present only on a WebSocket upgrade request.
    pub websocket_key: Option<String>,
}

/// Parses a request head.  `Ok(None)` means more bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    if request.parse(buf)?.is_partial() {
        return Ok(None);
    }

    let header = |name: &str| {
        request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::trim)
    };
    let is_upgrade = header("upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let websocket_key = if is_upgrade {
        header("sec-websocket-key").map(str::to_string)
    } else {
        None
    };

    let target = request.path.unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    Ok(Some(RequestHead {
        method: request.method.unwrap_or("GET").to_string(),
        path,
        websocket_key,
    }))
}

async fn read_head(stream: &mut TcpStream) -> anyhow::Result<Option<RequestHead>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.context("reading request head")?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head) = parse_head(&buf).context("malformed request head")? {
            return Ok(Some(head));
        }
        if buf.len() > MAX_HEAD_SIZE {
            anyhow::bail!("request head exceeds {MAX_HEAD_SIZE} bytes");
        }
    }
}

// ── Routing ───────────────────────────────────────────────────────────────────

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
) -> anyhow::Result<()> {
    let head = match timeout(HEAD_TIMEOUT, read_head(&mut stream)).await {
        Ok(Ok(Some(head))) => head,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            let _ = write_simple(&mut stream, 400, "Bad Request", "text/plain", b"Bad Request").await;
            return Err(e);
        }
        Err(_) => anyhow::bail!("timed out waiting for request head"),
    };
    debug!("{peer}: {} {}", head.method, head.path);

    if let Some(key) = &head.websocket_key {
        return upgrade_to_events(stream, key, peer, &ctx).await;
    }

    match (head.method.as_str(), head.path.as_str()) {
        ("GET", "/health") => {
            let body = serde_json::to_vec(&health_report(&ctx)).context("serializing health")?;
            write_simple(&mut stream, 200, "OK", "application/json", &body).await?;
        }
        ("GET", "/api/devices/serial") => {
            let (status, reason, body) = match list_serial_ports(Arc::clone(&ctx.ports)).await {
                Ok(ports) => (200, "OK", serde_json::to_vec(&PortList { ports })),
                Err(error) => {
                    warn!("{peer}: listing serial ports failed: {error}");
                    (
                        500,
                        "Internal Server Error",
                        serde_json::to_vec(&ErrorBody { error }),
                    )
                }
            };
            let body = body.context("serializing port list")?;
            write_simple(&mut stream, status, reason, "application/json", &body).await?;
        }
        ("GET", "/stream/mjpeg") => stream_mjpeg(stream, peer, &ctx).await?,
        _ => write_simple(&mut stream, 404, "Not Found", "text/plain", b"Not Found").await?,
    }
    Ok(())
}

async fn upgrade_to_events(
    mut stream: TcpStream,
    key: &str,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> anyhow::Result<()> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream
        .write_all(response.as_bytes())
        .await
        .context("writing upgrade response")?;

    let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    run_event_session(ws, Arc::clone(&ctx.relay), peer).await;
    Ok(())
}

// ── /health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub services: HealthServices,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthServices {
    pub serial: LinkStatus,
    pub video: PipelineStatus,
    pub clients: usize,
}

pub fn health_report(ctx: &ServerContext) -> HealthReport {
    HealthReport {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        services: HealthServices {
            serial: ctx.link.status(),
            video: ctx.pipeline.status(),
            clients: ctx.relay.gate().count(),
        },
    }
}

// ── /api/devices/serial ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PortList {
    ports: Vec<PortInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Runs the blocking enumeration on the blocking pool.
pub async fn list_serial_ports(ports: Arc<dyn PortLister>) -> Result<Vec<PortInfo>, String> {
    match tokio::task::spawn_blocking(move || ports.list_ports()).await {
        Ok(Ok(list)) => Ok(list),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("port enumeration task failed: {e}")),
    }
}

// ── /stream/mjpeg ─────────────────────────────────────────────────────────────

async fn stream_mjpeg(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> anyhow::Result<()> {
    // Subscribe before starting so an immediate exit is still observed.
    let mut events = ctx.pipeline.events();
    let mut frames = ctx.pipeline.subscribe();

    if let Err(e) = ctx.pipeline.start(&ctx.config.video).await {
        warn!("{peer}: cannot start video: {e}");
        let body = format!("Failed to start video stream: {e}");
        write_simple(
            &mut stream,
            500,
            "Internal Server Error",
            "text/plain",
            body.as_bytes(),
        )
        .await?;
        return Ok(());
    }

    let head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}\r\n\
         Cache-Control: no-cache\r\n\
         Pragma: no-cache\r\n\
         Connection: keep-alive\r\n\r\n"
    );
    stream.write_all(head.as_bytes()).await?;
    info!("{peer}: MJPEG stream opened");

    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            // Frames first: anything read before the exit is still delivered.
            biased;
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_part(&mut stream, &frame).await {
                    debug!("{peer}: MJPEG client gone: {e}");
                    break;
                }
                sent += 1;
            }
            event = events.recv() => match event {
                Ok(PipelineEvent::Exited { .. } | PipelineEvent::Failed { .. }) => {
                    info!("{peer}: capture ended; closing MJPEG stream");
                    break;
                }
                Ok(PipelineEvent::Started { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("{peer}: MJPEG stream closed after {sent} frames");
    Ok(())
}

/// Writes one multipart part carrying `frame`.
pub async fn write_part<W>(out: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!(
        "{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    out.write_all(header.as_bytes()).await?;
    out.write_all(frame).await?;
    out.write_all(b"\r\n").await?;
    out.flush().await
}

async fn write_simple<W>(
    out: &mut W,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    out.write_all(head.as_bytes()).await?;
    out.write_all(body).await?;
    out.shutdown().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_get() {
        let head = parse_head(b"GET /health?x=1 HTTP/1.1\r\nHost: kvm\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/health");
        assert_eq!(head.websocket_key, None);
    }

    #[test]
    fn test_parse_partial_head_needs_more() {
        assert_eq!(parse_head(b"GET /health HTTP/1.1\r\nHo").unwrap(), None);
    }

    #[test]
    fn test_parse_websocket_upgrade() {
        let raw = b"GET /ws HTTP/1.1\r\n\
                    Host: kvm\r\n\
                    Upgrade: WebSocket\r\n\
                    Connection: Upgrade\r\n\
                    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                    Sec-WebSocket-Version: 13\r\n\r\n";
        let head = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.websocket_key.as_deref(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
    }

    #[test]
    fn test_key_without_upgrade_header_is_ignored() {
        let raw = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n\r\n";
        assert_eq!(parse_head(raw).unwrap().unwrap().websocket_key, None);
    }

    #[test]
    fn test_garbage_head_is_an_error() {
        assert!(parse_head(b"\x00\x01\x02 nonsense\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn test_multipart_part_layout() {
        // Arrange
        let mut out = Vec::new();
        let frame = [0xFF, 0xD8, 0x01, 0xFF, 0xD9];

        // Act
        write_part(&mut out, &frame).await.unwrap();

        // Assert
        let mut expected =
            b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n".to_vec();
        expected.extend_from_slice(&frame);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_simple_response_has_length_and_close() {
        let mut out = Vec::new();
        write_simple(&mut out, 404, "Not Found", "text/plain", b"Not Found")
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.ends_with("\r\n\r\nNot Found"));
    }
}
