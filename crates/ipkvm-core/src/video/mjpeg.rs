//! Splits a continuous MJPEG byte stream into individual JPEG frames.
//!
//! A capture process writing `image2pipe` MJPEG produces concatenated JPEGs
//! with no container.  Frames are recovered by scanning for the Start-Of-Image
//! (`FF D8`) and End-Of-Image (`FF D9`) markers:
//!
//! ```text
//! garbage | FF D8 .. frame A .. FF D9 | FF D8 .. frame B .. FF D9 | FF D8 .. partial
//!           └──────── emitted ───────┘ └──────── emitted ───────┘ └── kept ──┘
//! ```
//!
//! The same demuxer serves the server's capture reader and the client's HTTP
//! stream reader.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

/// JPEG Start-Of-Image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG End-Of-Image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Accumulation cap; a buffer that grows past this without yielding a frame
/// is discarded.
pub const MAX_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Frames kept for late-joining subscribers.
pub const RING_CAPACITY: usize = 10;

/// Running counters, useful for logging stream health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub frames: u64,
    pub discarded_bytes: u64,
    pub overflows: u64,
}

/// Two-state SOI/EOI tokenizer over an accumulation buffer.
#[derive(Debug)]
pub struct FrameDemuxer {
    buffer: BytesMut,
    max_buffer: usize,
    stats: DemuxStats,
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self::with_max_buffer(MAX_BUFFER_SIZE)
    }

    /// Demuxer with a custom overflow cap.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer,
            stats: DemuxStats::default(),
        }
    }

    /// Appends `chunk` and returns every frame it completed, in stream order.
    ///
    /// Each returned frame starts with `FF D8` and ends with `FF D9`.  A frame
    /// is returned exactly once; partial frames stay buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            // State 1: searching for start.
            let Some(start) = find_marker(&self.buffer, SOI, 0) else {
                if self.buffer.len() > self.max_buffer {
                    self.overflow();
                }
                break;
            };

            // State 2: searching for end, from just past the start marker.
            let Some(eoi) = find_marker(&self.buffer, EOI, start + SOI.len()) else {
                self.discard(start);
                if self.buffer.len() > self.max_buffer {
                    self.overflow();
                }
                break;
            };

            self.discard(start);
            let frame_len = eoi - start + EOI.len();
            let frame = self.buffer.split_to(frame_len).freeze();
            self.stats.frames += 1;
            trace!("demuxed frame #{} ({} bytes)", self.stats.frames, frame.len());
            frames.push(frame);
        }

        frames
    }

    /// Bytes currently waiting for a marker.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            self.buffer.advance(count);
            self.stats.discarded_bytes += count as u64;
        }
    }

    fn overflow(&mut self) {
        warn!(
            "MJPEG buffer exceeded {} bytes without a complete frame; discarding",
            self.max_buffer
        );
        self.stats.discarded_bytes += self.buffer.len() as u64;
        self.stats.overflows += 1;
        self.buffer.clear();
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

// ── Frame ring ────────────────────────────────────────────────────────────────

/// Bounded FIFO of the most recent frames.
#[derive(Debug)]
pub struct FrameRing {
    frames: VecDeque<Bytes>,
    capacity: usize,
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new(RING_CAPACITY)
    }
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a frame, evicting the oldest when full.
    pub fn push(&mut self, frame: Bytes) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<Bytes> {
        self.frames.back().cloned()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
