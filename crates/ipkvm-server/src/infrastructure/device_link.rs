//! Device link: sole owner of the serial transport to the HID chip.
//!
//! All device I/O goes through this type.  The stream sits behind an async
//! mutex so a write can never interleave with another write mid-packet, and
//! [`DeviceLink::request`] holds the lock across drain, write, and read so a
//! reply always belongs to its request.
//!
//! Open/closed status is mirrored in an atomic so health checks never wait on
//! an in-flight read.  A second flag, `initialized`, drops on the first
//! transport error and only comes back with the next successful `open`; the
//! port can stay open while it is down.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::infrastructure::serial::{BoxedStream, TransportOpener};

/// Default bound on every device read.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between closing and reopening an already-open port.
pub const REOPEN_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("serial write failed: {0}")]
    Write(#[source] io::Error),

    #[error("serial read failed: {0}")]
    Read(#[source] io::Error),

    #[error("serial close failed: {0}")]
    Close(#[source] io::Error),

    #[error("Serial port not initialized")]
    NotOpen,
}

/// Snapshot for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub is_open: bool,
    pub is_initialized: bool,
    pub device: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone)]
struct LinkSettings {
    device: String,
    baud_rate: u32,
}

pub struct DeviceLink {
    opener: Arc<dyn TransportOpener>,
    settings: Mutex<LinkSettings>,
    is_open: AtomicBool,
    initialized: AtomicBool,
    stream: tokio::sync::Mutex<Option<BoxedStream>>,
    settle: Duration,
}

impl DeviceLink {
    /// Creates a closed link.  `device`/`baud_rate` are reported by
    /// [`DeviceLink::status`] until the first `open`.
    pub fn new(opener: Arc<dyn TransportOpener>, device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            opener,
            settings: Mutex::new(LinkSettings {
                device: device.into(),
                baud_rate,
            }),
            is_open: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            stream: tokio::sync::Mutex::new(None),
            settle: REOPEN_SETTLE,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Opens the transport, closing and reopening if it is already open.
    ///
    /// # Errors
    ///
    /// [`LinkError::Open`] if the transport fails before reporting open.
    pub async fn open(&self, path: &str, baud_rate: u32) -> Result<(), LinkError> {
        let mut guard = self.stream.lock().await;

        if let Some(mut old) = guard.take() {
            self.is_open.store(false, Ordering::Release);
            if let Err(e) = old.shutdown().await {
                debug!("error closing {path} before reopen: {e}");
            }
            drop(old);
            tokio::time::sleep(self.settle).await;
        }

        let stream = self
            .opener
            .open(path, baud_rate)
            .await
            .map_err(|source| {
                self.initialized.store(false, Ordering::Release);
                LinkError::Open {
                    path: path.to_string(),
                    source,
                }
            })?;

        *guard = Some(stream);
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = LinkSettings {
            device: path.to_string(),
            baud_rate,
        };
        self.is_open.store(true, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        info!("device link open on {path} at {baud_rate} baud");
        Ok(())
    }

    /// Writes one complete packet.  A closed link drops the bytes with a warning.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            warn!("device link not open; dropping {} byte write", bytes.len());
            return Ok(());
        };
        let result = write_all(stream, bytes).await;
        self.track(result)
    }

    /// Reads until at least `min_bytes` arrived or `timeout` elapsed.
    ///
    /// Returns exactly `min_bytes` bytes, or an empty vector on timeout.
    ///
    /// # Errors
    ///
    /// [`LinkError::NotOpen`] on a closed link, [`LinkError::Read`] on I/O
    /// failure.
    pub async fn read_exact(&self, min_bytes: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(LinkError::NotOpen)?;
        let result = read_at_least(stream, min_bytes, timeout).await;
        self.track(result)
    }

    /// Discards stale input, writes `bytes`, then reads the reply, all under
    /// one lock acquisition.
    pub async fn request(
        &self,
        bytes: &[u8],
        response_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, LinkError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(LinkError::NotOpen)?;
        let stale = drain_pending(stream);
        if stale > 0 {
            debug!("discarded {stale} stale bytes before request");
        }
        let result = match write_all(stream, bytes).await {
            Ok(()) => read_at_least(stream, response_len, timeout).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// Closes the transport.  Closing a closed link is a no-op.
    pub async fn close(&self) -> Result<(), LinkError> {
        let mut guard = self.stream.lock().await;
        let Some(mut stream) = guard.take() else {
            debug!("device link already closed");
            return Ok(());
        };
        self.is_open.store(false, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
        stream.shutdown().await.map_err(LinkError::Close)?;
        info!("device link closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub fn status(&self) -> LinkStatus {
        let settings = self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        LinkStatus {
            is_open: self.is_open(),
            is_initialized: self.initialized.load(Ordering::Acquire),
            device: settings.device,
            baud_rate: settings.baud_rate,
        }
    }
}

impl DeviceLink {
    fn track<T>(&self, result: Result<T, LinkError>) -> Result<T, LinkError> {
        if let Err(LinkError::Write(_) | LinkError::Read(_)) = &result {
            if self.initialized.swap(false, Ordering::AcqRel) {
                warn!("device link transport error; marked uninitialized until reopened");
            }
        }
        result
    }
}

// ── Stream helpers ────────────────────────────────────────────────────────────

async fn write_all(stream: &mut BoxedStream, bytes: &[u8]) -> Result<(), LinkError> {
    stream.write_all(bytes).await.map_err(LinkError::Write)?;
    stream.flush().await.map_err(LinkError::Write)?;
    trace!("wrote {} bytes: {:02X?}", bytes.len(), bytes);
    Ok(())
}

async fn read_at_least(
    stream: &mut BoxedStream,
    min_bytes: usize,
    timeout: Duration,
) -> Result<Vec<u8>, LinkError> {
    let deadline = Instant::now() + timeout;
    let mut received = Vec::with_capacity(min_bytes);
    let mut chunk = [0u8; 256];

    while received.len() < min_bytes {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Err(_) => {
                debug!(
                    "read timed out after {timeout:?} with {}/{min_bytes} bytes",
                    received.len()
                );
                return Ok(Vec::new());
            }
            Ok(Ok(0)) => {
                return Err(LinkError::Read(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }
            Ok(Ok(n)) => received.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(LinkError::Read(e)),
        }
    }

    received.truncate(min_bytes);
    trace!("read {} bytes: {:02X?}", received.len(), received);
    Ok(received)
}

/// Reads whatever is immediately available without waiting.
fn drain_pending(stream: &mut BoxedStream) -> usize {
    let mut chunk = [0u8; 256];
    let mut drained = 0;
    while let Some(Ok(n)) = stream.read(&mut chunk).now_or_never() {
        if n == 0 {
            break;
        }
        drained += n;
    }
    drained
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::DuplexStream;

    /// Hands out one end of an in-memory pipe and keeps the other for the test.
    #[derive(Default)]
    struct PipeOpener {
        far_ends: Mutex<Vec<DuplexStream>>,
        fail: bool,
    }

    impl PipeOpener {
        fn take_far_end(&self) -> DuplexStream {
            self.far_ends.lock().unwrap().pop().unwrap()
        }
    }

    #[async_trait]
    impl TransportOpener for PipeOpener {
        async fn open(&self, _path: &str, _baud: u32) -> io::Result<BoxedStream> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
            }
            let (near, far) = tokio::io::duplex(1024);
            self.far_ends.lock().unwrap().push(far);
            Ok(Box::new(near))
        }
    }

    async fn open_link() -> (DeviceLink, Arc<PipeOpener>) {
        let opener = Arc::new(PipeOpener::default());
        let link = DeviceLink::new(opener.clone(), "/dev/ttyTEST", 57600)
            .with_settle(Duration::from_millis(1));
        link.open("/dev/ttyTEST", 57600).await.unwrap();
        (link, opener)
    }

    #[tokio::test]
    async fn test_new_link_is_closed_and_reports_settings() {
        let link = DeviceLink::new(Arc::new(PipeOpener::default()), "/dev/ttyUSB0", 57600);
        assert_eq!(
            link.status(),
            LinkStatus {
                is_open: false,
                is_initialized: false,
                device: "/dev/ttyUSB0".into(),
                baud_rate: 57600
            }
        );
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_open_error() {
        let opener = Arc::new(PipeOpener {
            fail: true,
            ..Default::default()
        });
        let link = DeviceLink::new(opener, "/dev/missing", 9600);
        let err = link.open("/dev/missing", 9600).await.unwrap_err();
        assert!(matches!(err, LinkError::Open { ref path, .. } if path == "/dev/missing"));
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_write_reaches_transport() {
        // Arrange
        let (link, opener) = open_link().await;
        let mut far = opener.take_far_end();

        // Act
        link.write(&[0x57, 0xAB, 0x00, 0x01, 0x00, 0x01]).await.unwrap();

        // Assert
        let mut buf = [0u8; 6];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x57, 0xAB, 0x00, 0x01, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_write_on_closed_link_is_silent_noop() {
        let link = DeviceLink::new(Arc::new(PipeOpener::default()), "/dev/ttyUSB0", 57600);
        assert!(link.write(&[1, 2, 3]).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_uses_exact_bytes_with_mock_io() {
        struct MockOpener;

        #[async_trait]
        impl TransportOpener for MockOpener {
            async fn open(&self, _path: &str, _baud: u32) -> io::Result<BoxedStream> {
                let mock = tokio_test::io::Builder::new()
                    .write(&[0x57, 0xAB, 0x00, 0x02, 0x00, 0x02])
                    .build();
                Ok(Box::new(mock))
            }
        }

        let link = DeviceLink::new(Arc::new(MockOpener), "/dev/mock", 57600);
        link.open("/dev/mock", 57600).await.unwrap();
        link.write(&[0x57, 0xAB, 0x00, 0x02, 0x00, 0x02]).await.unwrap();
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_exact_returns_requested_bytes() {
        let (link, opener) = open_link().await;
        let mut far = opener.take_far_end();
        far.write_all(&[1, 2, 3, 4, 5]).await.unwrap();

        let bytes = link.read_exact(4, READ_TIMEOUT).await.unwrap();

        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_read_exact_accumulates_across_chunks() {
        let (link, opener) = open_link().await;
        let mut far = opener.take_far_end();

        let writer = tokio::spawn(async move {
            far.write_all(&[1, 2]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            far.write_all(&[3, 4]).await.unwrap();
            far
        });

        let bytes = link.read_exact(4, READ_TIMEOUT).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        drop(writer.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exact_times_out_with_empty_result() {
        let (link, opener) = open_link().await;
        let mut far = opener.take_far_end();
        far.write_all(&[9]).await.unwrap();

        let bytes = link.read_exact(14, READ_TIMEOUT).await.unwrap();

        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_read_exact_on_closed_link_is_not_open() {
        let link = DeviceLink::new(Arc::new(PipeOpener::default()), "/dev/ttyUSB0", 57600);
        assert!(matches!(
            link.read_exact(1, READ_TIMEOUT).await,
            Err(LinkError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_request_discards_stale_input_before_writing() {
        // Arrange: junk already waiting in the receive buffer
        let (link, opener) = open_link().await;
        let mut far = opener.take_far_end();
        far.write_all(&[0xEE, 0xEE, 0xEE]).await.unwrap();
        tokio::task::yield_now().await;

        let device = tokio::spawn(async move {
            let mut cmd = [0u8; 2];
            far.read_exact(&mut cmd).await.unwrap();
            far.write_all(&[0xA1, 0xA2]).await.unwrap();
            (cmd, far)
        });

        // Act
        let reply = link.request(&[0x10, 0x20], 2, READ_TIMEOUT).await.unwrap();

        // Assert
        let (cmd, _far) = device.await.unwrap();
        assert_eq!(cmd, [0x10, 0x20]);
        assert_eq!(reply, vec![0xA1, 0xA2]);
    }

    #[tokio::test]
    async fn test_reopen_replaces_transport() {
        let (link, opener) = open_link().await;
        link.open("/dev/ttyACM1", 115200).await.unwrap();

        assert!(link.is_open());
        assert_eq!(opener.far_ends.lock().unwrap().len(), 2);
        let status = link.status();
        assert_eq!(status.device, "/dev/ttyACM1");
        assert_eq!(status.baud_rate, 115200);
    }

    #[tokio::test]
    async fn test_transport_error_clears_initialized_until_reopen() {
        // Arrange: the chip side of the pipe goes away
        let (link, opener) = open_link().await;
        assert!(link.status().is_initialized);
        drop(opener.take_far_end());

        // Act
        let result = link.read_exact(1, READ_TIMEOUT).await;

        // Assert
        assert!(matches!(result, Err(LinkError::Read(_))));
        let status = link.status();
        assert!(status.is_open);
        assert!(!status.is_initialized);

        link.open("/dev/ttyTEST", 57600).await.unwrap();
        assert!(link.status().is_initialized);
    }

    #[tokio::test]
    async fn test_failed_open_and_close_report_uninitialized() {
        let opener = Arc::new(PipeOpener {
            fail: true,
            ..Default::default()
        });
        let link = DeviceLink::new(opener, "/dev/missing", 9600);
        let _ = link.open("/dev/missing", 9600).await;
        assert!(!link.status().is_initialized);

        let (link, _opener) = open_link().await;
        link.close().await.unwrap();
        assert!(!link.status().is_initialized);
    }

    #[tokio::test]
    async fn test_close_then_close_again_is_ok() {
        let (link, _opener) = open_link().await;
        link.close().await.unwrap();
        assert!(!link.is_open());
        link.close().await.unwrap();
    }

    #[test]
    fn test_link_status_serializes_camel_case() {
        let value = serde_json::to_value(LinkStatus {
            is_open: true,
            is_initialized: true,
            device: "/dev/ttyUSB0".into(),
            baud_rate: 57600,
        })
        .unwrap();
        assert_eq!(value["isOpen"], true);
        assert_eq!(value["isInitialized"], true);
        assert_eq!(value["baudRate"], 57600);
    }
}
