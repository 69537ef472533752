//! ipkvm-server entry point.
//!
//! Startup order: configuration, device link, device worker, relay, video
//! pipeline, HTTP listener.  Shutdown runs in reverse: sessions are evicted,
//! capture is stopped, then the device link is closed.
//!
//! # Usage
//!
//! ```text
//! ipkvm-server [OPTIONS]
//!
//! Options:
//!   --port <PORT>                    HTTP port [env: PORT] [default: 3000]
//!   --host <HOST>                    Bind address [env: HOST] [default: 0.0.0.0]
//!   --serial-device <PATH>           [env: SERIAL_DEVICE] [default: /dev/ttyUSB0]
//!   --serial-baud <BAUD>             [env: SERIAL_BAUD] [default: 57600]
//!   --video-device <PATH>            [env: VIDEO_DEVICE] [default: /dev/video0]
//!   --video-resolution <WxH>         [env: VIDEO_RESOLUTION] [default: 1920x1080]
//!   --mjpeg-fps <FPS>                [env: MJPEG_FPS] [default: 30]
//!   --mjpeg-quality <Q>              [env: MJPEG_QUALITY] [default: 80]
//!   --capture-program <PROGRAM>      [env: CAPTURE_PROGRAM] [default: ffmpeg]
//!   --config <FILE>                  Optional TOML file [env: IPKVM_CONFIG]
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ipkvm_server::application::{Relay, SessionGate};
use ipkvm_server::domain::{Resolution, ServerConfig};
use ipkvm_server::infrastructure::config_file::load_from_path;
use ipkvm_server::infrastructure::device_worker::DEFAULT_QUEUE_DEPTH;
use ipkvm_server::infrastructure::{
    run_server, DeviceLink, DeviceWorker, DirectController, SerialPortOpener, ServerContext,
    VideoPipeline,
};

#[derive(Debug, Default, Parser)]
#[command(
    name = "ipkvm-server",
    about = "Single-client IP-KVM bridge: serial HID chip, MJPEG capture, browser relay",
    version
)]
struct Cli {
    /// HTTP / WebSocket port.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Address to bind.
    #[arg(long, env = "HOST")]
    host: Option<IpAddr>,

    /// Serial device of the HID-emulation chip.
    #[arg(long, env = "SERIAL_DEVICE")]
    serial_device: Option<String>,

    #[arg(long, env = "SERIAL_BAUD")]
    serial_baud: Option<u32>,

    /// V4L2 capture device.
    #[arg(long, env = "VIDEO_DEVICE")]
    video_device: Option<String>,

    /// Capture size, `WIDTHxHEIGHT`.
    #[arg(long, env = "VIDEO_RESOLUTION")]
    video_resolution: Option<Resolution>,

    #[arg(long, env = "MJPEG_FPS")]
    mjpeg_fps: Option<u32>,

    /// Encoder quality passed as `-q:v`.
    #[arg(long, env = "MJPEG_QUALITY")]
    mjpeg_quality: Option<u32>,

    /// Capture executable.
    #[arg(long, env = "CAPTURE_PROGRAM")]
    capture_program: Option<String>,

    /// TOML file supplying values not given on the command line or environment.
    #[arg(long, env = "IPKVM_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Layers flags/environment over the config file over defaults.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_from_path(path)
                .and_then(|file| file.into_server_config())
                .with_context(|| format!("loading config file {}", path.display()))?,
            None => ServerConfig::default(),
        };

        let ip = self.host.unwrap_or_else(|| config.bind_addr.ip());
        let port = self.port.unwrap_or_else(|| config.bind_addr.port());
        config.bind_addr = SocketAddr::new(ip, port);

        if let Some(device) = self.serial_device {
            config.serial.device = device;
        }
        if let Some(baud) = self.serial_baud {
            config.serial.baud_rate = baud;
        }
        if let Some(device) = self.video_device {
            config.video.device = device;
        }
        if let Some(resolution) = self.video_resolution {
            config.video.resolution = resolution;
        }
        if let Some(fps) = self.mjpeg_fps {
            config.video.fps = fps;
        }
        if let Some(quality) = self.mjpeg_quality {
            config.video.quality = quality;
        }
        if let Some(program) = self.capture_program {
            config.video.capture_program = program;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;
    info!(
        "IP-KVM bridge starting: http={}, serial={}@{}, video={} {}",
        config.bind_addr,
        config.serial.device,
        config.serial.baud_rate,
        config.video.device,
        config.video.resolution
    );

    // ── Device path ───────────────────────────────────────────────────────────
    let link = Arc::new(DeviceLink::new(
        Arc::new(SerialPortOpener),
        config.serial.device.clone(),
        config.serial.baud_rate,
    ));
    link.open(&config.serial.device, config.serial.baud_rate)
        .await
        .context("failed to open serial link to the HID chip")?;

    let direct = Arc::new(DirectController::new(Arc::clone(&link)));
    let (device, worker) = DeviceWorker::spawn(direct, DEFAULT_QUEUE_DEPTH);

    let gate = Arc::new(SessionGate::new());
    let relay = Arc::new(Relay::new(
        Arc::new(device),
        Arc::clone(&gate),
        config.serial.device.clone(),
        config.video.device.clone(),
    ));

    // ── Video path ────────────────────────────────────────────────────────────
    let pipeline = Arc::new(VideoPipeline::new(config.video.clone()));
    let mut pipeline_events = pipeline.events();
    tokio::spawn(async move {
        while let Ok(event) = pipeline_events.recv().await {
            info!("video pipeline: {event:?}");
        }
    });

    let ctx = Arc::new(ServerContext {
        config,
        relay,
        pipeline: Arc::clone(&pipeline),
        link: Arc::clone(&link),
        ports: Arc::new(SerialPortOpener),
    });

    // ── Shutdown signal ───────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_listener(Arc::clone(&running));

    let served = run_server(Arc::clone(&ctx), running).await;

    // ── Teardown ──────────────────────────────────────────────────────────────
    let evicted = gate.evict_all();
    info!("evicted {evicted} session(s)");
    pipeline.stop().await;
    if let Err(e) = link.close().await {
        warn!("error closing serial link: {e}");
    }
    drop(ctx);
    // The worker ends once the last DeviceHandle (inside the relay) is gone;
    // sessions still finishing may hold it briefly.
    worker.abort();

    served?;
    info!("IP-KVM bridge stopped");
    Ok(())
}

/// Clears `running` on Ctrl+C, or SIGTERM on unix.
fn spawn_signal_listener(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        r = tokio::signal::ctrl_c() => {
                            if let Err(e) = r {
                                error!("failed to listen for Ctrl+C: {e}");
                            }
                            info!("received Ctrl+C; shutting down");
                        }
                        _ = term.recv() => info!("received SIGTERM; shutting down"),
                    }
                }
                Err(e) => {
                    warn!("SIGTERM handler unavailable: {e}");
                    wait_ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        wait_ctrl_c().await;

        running.store(false, Ordering::Relaxed);
    });
}

async fn wait_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => error!("failed to listen for Ctrl+C: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
