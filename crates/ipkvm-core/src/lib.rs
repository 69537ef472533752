//! # ipkvm-core
//!
//! Shared library for the IP-KVM bridge containing the device wire codec,
//! the HID report model, and the MJPEG frame demultiplexer.
//!
//! This crate is used by both the bridge server and the command-line client.
//! It performs no I/O: no serial ports, no sockets, no subprocesses.
//!
//! # Architecture overview
//!
//! The bridge sits between a USB HID-emulation chip (reached over a serial
//! line) and one remote operator.  The operator's keyboard and mouse events
//! become checksummed command packets for the chip, and the output of a video
//! capture process becomes a stream of JPEG frames for the operator.
//!
//! - **`protocol`** – How bytes travel to and from the chip.  Packets are
//!   `0x57 0xAB ADDR CMD LEN DATA.. SUM` and are found again in a noisy byte
//!   stream by scanning for the two magic bytes.
//!
//! - **`domain`** – Validated keyboard and mouse reports plus the scaling and
//!   clamping rules that turn operator input into chip payloads.
//!
//! - **`video`** – The two-state SOI/EOI tokenizer that splits a continuous
//!   MJPEG byte stream into frames, and the small ring kept for late joiners.
//!
//! - **`device`** – The [`DeviceController`] capability: "something that can
//!   drive the HID chip", implemented once over a local serial link and once
//!   over the relay's event channel.

pub mod device;
pub mod domain;
pub mod protocol;
pub mod video;

pub use device::{DeviceController, DeviceError};
pub use domain::hid::{
    AbsoluteMouseReport, HidError, KeyboardReport, ModifierFlags, MouseButtons,
    RelativeMouseReport,
};
pub use protocol::codec::{decode, encode, CommandPacket, ProtocolError};
pub use protocol::info::{InfoError, InfoPacket};
pub use protocol::commands::CmdCode;
pub use video::mjpeg::{FrameDemuxer, FrameRing};

#[cfg(feature = "mock")]
pub use device::MockDeviceController;
