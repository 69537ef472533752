//! Application layer for ipkvm-client: operator commands.

pub mod commands;

pub use commands::{CommandError, DEFAULT_HOLD};
