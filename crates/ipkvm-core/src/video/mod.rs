//! Video framing: MJPEG stream tokenizer and recent-frame ring.

pub mod mjpeg;

pub use mjpeg::{FrameDemuxer, FrameRing};
