//! Infrastructure layer for ipkvm-client.
//!
//! - `remote_controller` – `DeviceController` over the bridge's event channel
//! - `serial_session`    – `DeviceController` over a local serial port
//! - `mjpeg_snapshot`    – single-frame grab from `/stream/mjpeg`

pub mod mjpeg_snapshot;
pub mod remote_controller;
pub mod serial_session;

pub use mjpeg_snapshot::{snapshot, SnapshotError};
pub use remote_controller::{RemoteController, RemoteError};
pub use serial_session::SerialSession;
