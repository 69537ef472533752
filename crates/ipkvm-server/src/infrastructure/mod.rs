//! Infrastructure layer for ipkvm-server.
//!
//! Everything that touches the outside world: the serial port, the capture
//! subprocess, TCP sockets, and the configuration file.
//!
//! - `serial`         – transport opener (real port or test pipe), port listing
//! - `device_link`    – owns the serial stream; framed writes, bounded reads
//! - `direct_device`  – `DeviceController` over a local `DeviceLink`
//! - `device_worker`  – serializes all controller calls through one task
//! - `video_pipeline` – capture process supervisor and frame fan-out
//! - `event_session`  – one realtime event-channel connection
//! - `http_server`    – accept loop and routing
//! - `config_file`    – optional TOML configuration

pub mod config_file;
pub mod device_link;
pub mod device_worker;
pub mod direct_device;
pub mod event_session;
pub mod http_server;
pub mod serial;
pub mod video_pipeline;

pub use device_link::{DeviceLink, LinkError, LinkStatus};
pub use device_worker::{DeviceHandle, DeviceWorker};
pub use direct_device::DirectController;
pub use http_server::{run_server, serve, ServerContext};
pub use serial::{PortInfo, PortLister, SerialPortOpener, TransportOpener};
pub use video_pipeline::{PipelineEvent, VideoPipeline};
