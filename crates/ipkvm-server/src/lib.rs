//! ipkvm-server library crate.
//!
//! A single-client IP-KVM bridge: one operator's keyboard and mouse events
//! reach a serial HID-emulation chip, and the target machine's video reaches
//! the operator as an MJPEG stream.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Operator (JSON over WebSocket, MJPEG over HTTP)
//!         ↕
//! [ipkvm-server]
//!   ├── domain/           Config, event-channel message types
//!   ├── application/      Session gate, relay (event → HID report)
//!   └── infrastructure/
//!         ├── device_link / device_worker / direct_device   serial chip
//!         ├── video_pipeline                                capture process
//!         └── http_server / event_session                   network surface
//! ```
//!
//! Components are constructed once in `main.rs` and passed down by `Arc`;
//! there is no process-wide state.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: admission and event relaying.
pub mod application;

/// Infrastructure layer: serial port, capture process, network.
pub mod infrastructure;
