//! Client commands driven through a running bridge, with an in-memory chip
//! behind the bridge's serial link.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ipkvm_client::application::commands;
use ipkvm_client::infrastructure::{snapshot, RemoteController, RemoteError};
use ipkvm_core::{decode, encode, CommandPacket, ProtocolError};
use ipkvm_server::application::{Relay, SessionGate};
use ipkvm_server::domain::config::VideoConfig;
use ipkvm_server::domain::messages::ErrorCode;
use ipkvm_server::domain::ServerConfig;
use ipkvm_server::infrastructure::serial::BoxedStream;
use ipkvm_server::infrastructure::video_pipeline::CaptureCommand;
use ipkvm_server::infrastructure::{
    serve, DeviceLink, DeviceWorker, DirectController, PortInfo, PortLister, ServerContext,
    TransportOpener, VideoPipeline,
};

struct PipeOpener(Mutex<Option<DuplexStream>>);

#[async_trait]
impl TransportOpener for PipeOpener {
    async fn open(&self, _path: &str, _baud_rate: u32) -> std::io::Result<BoxedStream> {
        let (near, far) = tokio::io::duplex(4096);
        *self.0.lock().unwrap() = Some(far);
        Ok(Box::new(near))
    }
}

async fn fake_chip(mut port: DuplexStream, seen: mpsc::UnboundedSender<CommandPacket>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = match port.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        loop {
            match decode(&buf) {
                Ok((packet, end)) => {
                    buf.drain(..end);
                    if packet.cmd == 0x01 {
                        // V1.0, target connected, num lock on
                        let reply = encode(0x00, 0x81, &[0x30, 0x01, 0x01, 0, 0, 0, 0, 0]);
                        if port.write_all(&reply).await.is_err() {
                            return;
                        }
                    } else {
                        let _ = seen.send(packet);
                    }
                }
                Err(ProtocolError::Truncated { .. }) => break,
                Err(_) => {
                    buf.clear();
                    break;
                }
            }
        }
    }
}

struct NoPorts;

impl PortLister for NoPorts {
    fn list_ports(&self) -> std::io::Result<Vec<PortInfo>> {
        Ok(Vec::new())
    }
}

fn one_frame(_: &VideoConfig) -> CaptureCommand {
    CaptureCommand {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r"printf '\377\330JPEG\377\331'; exec sleep 30".to_string(),
        ],
    }
}

struct Bridge {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    chip_rx: mpsc::UnboundedReceiver<CommandPacket>,
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start_bridge() -> Bridge {
    let opener = Arc::new(PipeOpener(Mutex::new(None)));
    let link = Arc::new(DeviceLink::new(opener.clone(), "/dev/ttyFAKE", 57600));
    link.open("/dev/ttyFAKE", 57600).await.unwrap();
    let far = opener.0.lock().unwrap().take().unwrap();
    let (chip_tx, chip_rx) = mpsc::unbounded_channel();
    tokio::spawn(fake_chip(far, chip_tx));

    let direct = Arc::new(DirectController::new(Arc::clone(&link)));
    let (device, _worker) = DeviceWorker::spawn(direct, 16);
    let relay = Arc::new(Relay::new(
        Arc::new(device),
        Arc::new(SessionGate::new()),
        "/dev/ttyFAKE",
        "/dev/videoFAKE",
    ));
    let config = ServerConfig::default();
    let pipeline = Arc::new(VideoPipeline::with_command_builder(
        config.video.clone(),
        one_frame,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = Arc::new(ServerContext {
        config,
        relay,
        pipeline,
        link,
        ports: Arc::new(NoPorts),
    });
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(listener, ctx, Arc::clone(&running)));

    Bridge {
        addr,
        running,
        chip_rx,
    }
}

async fn next_packet(rx: &mut mpsc::UnboundedReceiver<CommandPacket>) -> CommandPacket {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("packet within 5s")
        .expect("chip alive")
}

#[tokio::test]
async fn test_remote_info_round_trip() {
    // Arrange
    let bridge = start_bridge().await;
    let remote = RemoteController::connect(&format!("ws://{}/ws", bridge.addr))
        .await
        .unwrap();

    // Act
    let info = commands::query_info(&remote).await.unwrap();

    // Assert
    assert_eq!(info.chip_version(), "V1.0");
    assert!(info.is_connected);
    assert!(info.num_lock && !info.caps_lock);
    assert_eq!(remote.admission_status().serial_port, "/dev/ttyFAKE");
}

#[tokio::test]
async fn test_remote_typing_reaches_the_chip() {
    // Arrange
    let mut bridge = start_bridge().await;
    let remote = RemoteController::connect(&format!("ws://{}/ws", bridge.addr))
        .await
        .unwrap();

    // Act
    commands::type_text(&remote, "A", Duration::ZERO).await.unwrap();

    // Assert: shift+a, then all released
    let press = next_packet(&mut bridge.chip_rx).await;
    assert_eq!(press.cmd, 0x02);
    assert_eq!(press.data, vec![0x02, 0x00, 0x04, 0, 0, 0, 0, 0]);
    let release = next_packet(&mut bridge.chip_rx).await;
    assert_eq!(release.data, vec![0; 8]);
}

#[tokio::test]
async fn test_remote_relative_move_is_split_and_clamped() {
    let mut bridge = start_bridge().await;
    let remote = RemoteController::connect(&format!("ws://{}/ws", bridge.addr))
        .await
        .unwrap();

    commands::move_by(&remote, 200, 0).await.unwrap();

    let first = next_packet(&mut bridge.chip_rx).await;
    assert_eq!(first.cmd, 0x05);
    assert_eq!(first.data, vec![0x01, 0x00, 0x7F, 0x00, 0x00]);
    let second = next_packet(&mut bridge.chip_rx).await;
    assert_eq!(second.data, vec![0x01, 0x00, 73, 0x00, 0x00]);
}

#[tokio::test]
async fn test_second_remote_is_rejected() {
    let bridge = start_bridge().await;
    let url = format!("ws://{}/ws", bridge.addr);
    let _first = RemoteController::connect(&url).await.unwrap();

    let second = RemoteController::connect(&url).await;

    assert!(matches!(
        second,
        Err(RemoteError::Rejected {
            code: ErrorCode::MaxClients,
            ..
        })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_snapshot_saves_first_frame() {
    // Arrange
    let bridge = start_bridge().await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("frame.jpg");

    // Act
    let frame = snapshot(&bridge.addr.to_string()).await.unwrap();
    tokio::fs::write(&out, &frame).await.unwrap();

    // Assert
    let saved = std::fs::read(&out).unwrap();
    assert_eq!(saved, b"\xFF\xD8JPEG\xFF\xD9".to_vec());
}
