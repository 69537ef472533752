//! Domain layer for ipkvm-server.
//!
//! Pure types with no I/O: runtime configuration and the JSON events of the
//! realtime channel.

pub mod config;
pub mod messages;

pub use config::{Resolution, SerialConfig, ServerConfig, VideoConfig, MAX_CLIENTS};
pub use messages::{ClientEvent, ClientEventKind, ErrorCode, ServerEvent};
