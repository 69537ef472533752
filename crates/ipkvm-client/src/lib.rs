//! # ipkvm-client
//!
//! Headless operator tool for the IP-KVM bridge.
//!
//! Every command runs against a [`DeviceController`](ipkvm_core::DeviceController),
//! so the same `key`, `type` or `move-abs` invocation works whether the chip
//! is reached through a running bridge ([`RemoteController`]) or plugged in
//! locally ([`SerialSession`]).  Video is read from the bridge only.
//!
//! [`RemoteController`]: infrastructure::RemoteController
//! [`SerialSession`]: infrastructure::SerialSession

pub mod application;
pub mod domain;
pub mod infrastructure;
