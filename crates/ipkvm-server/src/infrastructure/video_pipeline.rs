//! Video pipeline: supervises the capture subprocess and fans out JPEG frames.
//!
//! ```text
//!  capture process ── stdout ──► FrameDemuxer ──► FrameRing (last 10)
//!        │                                   └──► broadcast<Bytes> ──► subscribers
//!        └── stderr ──► scanned for "error" lines, logged
//!
//!  supervisor task: waits for exit or stop ──► broadcast<PipelineEvent>
//! ```
//!
//! Frame delivery is lossy: a subscriber that falls behind skips frames
//! rather than slowing the reader.  When nobody subscribes, frames only land
//! in the ring.  The pipeline never restarts itself; callers watch
//! [`PipelineEvent`]s and decide.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use ipkvm_core::video::mjpeg::{FrameDemuxer, FrameRing};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::config::VideoConfig;

/// Time allowed between SIGTERM and SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Frames buffered per subscriber before it starts skipping.
const FRAME_CHANNEL_DEPTH: usize = 4;
const EVENT_CHANNEL_DEPTH: usize = 16;
const READ_CHUNK: usize = 64 * 1024;
/// How long to let the reader drain stdout after the process exits.
const READER_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn capture process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture process has no stdout")]
    MissingStdout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Started { pid: Option<u32> },
    /// The process ended, on its own or after `stop()`.
    Exited { code: Option<i32> },
    /// Spawning or waiting on the process failed.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub is_streaming: bool,
    pub device: String,
    pub resolution: String,
    pub fps: u32,
    pub quality: u32,
}

/// Program and arguments for one capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// V4L2 MJPEG capture re-encoded to an `image2pipe` stream on stdout.
    pub fn ffmpeg(config: &VideoConfig) -> Self {
        let size = config.resolution.to_string();
        let fps = config.fps.to_string();
        let quality = config.quality.to_string();
        let args = [
            "-f",
            "v4l2",
            "-input_format",
            "mjpeg",
            "-video_size",
            size.as_str(),
            "-framerate",
            fps.as_str(),
            "-i",
            config.device.as_str(),
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-q:v",
            quality.as_str(),
            "-",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            program: config.capture_program.clone(),
            args,
        }
    }
}

pub type CommandBuilder = fn(&VideoConfig) -> CaptureCommand;

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    frames: broadcast::Sender<Bytes>,
    events: broadcast::Sender<PipelineEvent>,
    ring: Mutex<FrameRing>,
    streaming: AtomicBool,
    settings: Mutex<VideoConfig>,
}

impl Shared {
    /// Ring push and broadcast happen under the ring lock, so a concurrent
    /// [`VideoPipeline::subscribe`] sees the frame either primed or on its
    /// receiver, never both.
    fn publish(&self, frame: Bytes) {
        let mut ring = lock(&self.ring);
        ring.push(frame.clone());
        // No receivers: the frame is dropped, which is intended.
        let _ = self.frames.send(frame);
    }

    fn emit(&self, event: PipelineEvent) {
        debug!("pipeline event: {event:?}");
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RunningCapture {
    stop_tx: oneshot::Sender<()>,
    supervisor: JoinHandle<()>,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct VideoPipeline {
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Option<RunningCapture>>,
    command_builder: CommandBuilder,
    grace: Duration,
}

impl VideoPipeline {
    /// Pipeline that captures with `ffmpeg` using `config`.
    pub fn new(config: VideoConfig) -> Self {
        Self::with_command_builder(config, CaptureCommand::ffmpeg)
    }

    pub fn with_command_builder(config: VideoConfig, command_builder: CommandBuilder) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_DEPTH);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        Self {
            shared: Arc::new(Shared {
                frames,
                events,
                ring: Mutex::new(FrameRing::default()),
                streaming: AtomicBool::new(false),
                settings: Mutex::new(config),
            }),
            control: tokio::sync::Mutex::new(None),
            command_builder,
            grace: STOP_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Spawns the capture process.  No-op if already streaming.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Spawn`] if the process cannot be started; a
    /// [`PipelineEvent::Failed`] is raised as well.
    pub async fn start(&self, config: &VideoConfig) -> Result<(), PipelineError> {
        let mut control = self.control.lock().await;
        if self.is_streaming() {
            debug!("capture already running; start ignored");
            return Ok(());
        }
        // A previous run that ended by itself leaves a finished supervisor
        // and possibly its last frames.
        control.take();
        lock(&self.shared.ring).clear();

        *lock(&self.shared.settings) = config.clone();
        let command = (self.command_builder)(config);
        info!("starting capture: {} {}", command.program, command.args.join(" "));

        let mut child = match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.shared.emit(PipelineEvent::Failed {
                    reason: source.to_string(),
                });
                return Err(PipelineError::Spawn {
                    program: command.program,
                    source,
                });
            }
        };

        let stdout = child.stdout.take().ok_or(PipelineError::MissingStdout)?;
        let stderr = child.stderr.take();
        let pid = child.id();

        self.shared.streaming.store(true, Ordering::Release);
        self.shared.emit(PipelineEvent::Started { pid });

        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            child,
            stdout,
            stderr,
            stop_rx,
            Arc::clone(&self.shared),
            self.grace,
        ));
        *control = Some(RunningCapture {
            stop_tx,
            supervisor,
        });
        Ok(())
    }

    /// Terminates the capture process (SIGTERM, then SIGKILL after the grace
    /// period) and clears the frame ring.  No-op when idle.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let Some(running) = control.take() else {
            debug!("capture not running; stop ignored");
            return;
        };
        let _ = running.stop_tx.send(());
        if let Err(e) = running.supervisor.await {
            warn!("capture supervisor ended abnormally: {e}");
        }
        self.shared.streaming.store(false, Ordering::Release);
        lock(&self.shared.ring).clear();
        info!("capture stopped");
    }

    /// New frame subscription, primed with the newest buffered frame.
    /// Dropping it unsubscribes.
    pub fn subscribe(&self) -> FrameSubscription {
        let ring = lock(&self.shared.ring);
        FrameSubscription {
            primed: ring.latest(),
            rx: self.shared.frames.subscribe(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.frames.receiver_count()
    }

    /// Buffered frames, oldest first.
    pub fn recent_frames(&self) -> Vec<Bytes> {
        lock(&self.shared.ring).iter().cloned().collect()
    }

    pub fn status(&self) -> PipelineStatus {
        let settings = lock(&self.shared.settings);
        PipelineStatus {
            is_streaming: self.is_streaming(),
            device: settings.device.clone(),
            resolution: settings.resolution.to_string(),
            fps: settings.fps,
            quality: settings.quality,
        }
    }
}

/// Receiving end of the frame fan-out.
pub struct FrameSubscription {
    primed: Option<Bytes>,
    rx: broadcast::Receiver<Bytes>,
}

impl FrameSubscription {
    /// Next frame, skipping any this subscriber was too slow to take.
    /// `None` once the pipeline is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if let Some(frame) = self.primed.take() {
            return Some(frame);
        }
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!("subscriber skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    Stopped(Option<std::process::ExitStatus>),
}

async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    stop_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    grace: Duration,
) {
    let mut reader = tokio::spawn(read_frames(stdout, Arc::clone(&shared)));
    let stderr_task = stderr.map(|s| tokio::spawn(scan_stderr(s)));

    // A dropped sender (pipeline gone) counts as a stop request.
    let ending = tokio::select! {
        status = child.wait() => Ending::Exited(status),
        _ = stop_rx => Ending::Stopped(terminate(&mut child, grace).await),
    };

    match ending {
        Ending::Exited(_) => {
            if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        Ending::Stopped(_) => reader.abort(),
    }
    if let Some(task) = stderr_task {
        task.abort();
    }

    shared.streaming.store(false, Ordering::Release);
    match ending {
        Ending::Exited(Ok(status)) => {
            if status.success() {
                info!("capture process exited");
            } else {
                warn!("capture process exited with {status}");
            }
            shared.emit(PipelineEvent::Exited {
                code: status.code(),
            });
        }
        Ending::Exited(Err(e)) => {
            warn!("failed waiting on capture process: {e}");
            shared.emit(PipelineEvent::Failed {
                reason: e.to_string(),
            });
        }
        Ending::Stopped(status) => {
            shared.emit(PipelineEvent::Exited {
                code: status.and_then(|s| s.code()),
            });
        }
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> Option<std::process::ExitStatus> {
    send_sigterm(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("failed waiting on capture process: {e}");
            None
        }
        Err(_) => {
            warn!("capture process ignored SIGTERM for {grace:?}; killing");
            if let Err(e) = child.kill().await {
                warn!("failed to kill capture process: {e}");
            }
            child.try_wait().ok().flatten()
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` belongs to a child we have not yet reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!("SIGTERM to {pid} failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

async fn read_frames(mut stdout: ChildStdout, shared: Arc<Shared>) {
    let mut demux = FrameDemuxer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for frame in demux.push(&chunk[..n]) {
                    shared.publish(frame);
                }
            }
            Err(e) => {
                warn!("capture stdout read failed: {e}");
                break;
            }
        }
    }
    let stats = demux.stats();
    debug!(
        "capture stdout closed: {} frames, {} bytes discarded",
        stats.frames, stats.discarded_bytes
    );
}

async fn scan_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("error") || line.contains("Error") {
            warn!("capture: {line}");
        } else {
            trace!("capture: {line}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
