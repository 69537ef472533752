//! Grabs single frames from the bridge's `/stream/mjpeg` endpoint.
//!
//! The multipart body is not parsed part by part: it is fed straight into a
//! [`FrameDemuxer`], which skips the part headers as inter-frame noise.

use std::time::Duration;

use bytes::Bytes;
use ipkvm_core::FrameDemuxer;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Longest silence tolerated between reads of the stream.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(3);

const MAX_HEAD_SIZE: usize = 16 * 1024;
const MAX_HEADERS: usize = 32;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge answered HTTP {0}")]
    Status(u16),

    #[error("malformed HTTP response head")]
    BadResponse,

    #[error("no video data for {0:?}")]
    Stalled(Duration),

    #[error("stream ended before a complete frame arrived")]
    Ended,
}

/// Opens `GET /stream/mjpeg` on `addr` (`host:port`) and returns the first
/// complete JPEG.
pub async fn snapshot(addr: &str) -> Result<Bytes, SnapshotError> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "GET /stream/mjpeg HTTP/1.1\r\nHost: {addr}\r\nAccept: multipart/x-mixed-replace\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    read_first_frame(&mut stream, STALL_TIMEOUT).await
}

/// Reads an HTTP response from `reader`, checks for `200`, and demuxes the
/// body until one frame is complete.
pub async fn read_first_frame<R>(reader: &mut R, stall: Duration) -> Result<Bytes, SnapshotError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = vec![0u8; 16 * 1024];

    // Response head.
    let (status, body_start) = loop {
        if let Some(parsed) = parse_head(&buf)? {
            break parsed;
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(SnapshotError::BadResponse);
        }
        let n = read_some(reader, &mut chunk, stall).await?;
        buf.extend_from_slice(&chunk[..n]);
    };
    if status != 200 {
        return Err(SnapshotError::Status(status));
    }
    debug!("MJPEG stream open");

    let mut demux = FrameDemuxer::new();
    if let Some(frame) = demux.push(&buf[body_start..]).into_iter().next() {
        return Ok(frame);
    }
    loop {
        let n = read_some(reader, &mut chunk, stall).await?;
        trace!("read {n} stream bytes");
        if let Some(frame) = demux.push(&chunk[..n]).into_iter().next() {
            return Ok(frame);
        }
    }
}

/// One read bounded by `stall`; end of stream is [`SnapshotError::Ended`].
async fn read_some<R>(reader: &mut R, chunk: &mut [u8], stall: Duration) -> Result<usize, SnapshotError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(stall, reader.read(chunk)).await {
        Ok(Ok(0)) => Err(SnapshotError::Ended),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(SnapshotError::Io(e)),
        Err(_) => Err(SnapshotError::Stalled(stall)),
    }
}

/// Status code and body offset of a complete response head; `None` while
/// the head is still partial.
fn parse_head(buf: &[u8]) -> Result<Option<(u16, usize)>, SnapshotError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf) {
        Ok(httparse::Status::Complete(body_start)) => response
            .code
            .map(|code| Some((code, body_start)))
            .ok_or(SnapshotError::BadResponse),
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => {
            debug!("bad response head: {e}");
            Err(SnapshotError::BadResponse)
        }
    }
}
