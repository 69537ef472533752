//! Application layer for ipkvm-server.
//!
//! Knows *what* to do with operator events and admissions; delegates device
//! I/O to a [`ipkvm_core::DeviceController`] supplied by the infrastructure
//! layer.
//!
//! - `session_gate` – single-controller admission and liveness tracking
//! - `relay`        – event validation, translation, and error mapping

pub mod relay;
pub mod session_gate;

pub use relay::{Relay, INFO_REQUEST_TIMEOUT};
pub use session_gate::{Admission, ClientSession, GateError, SessionGate};
