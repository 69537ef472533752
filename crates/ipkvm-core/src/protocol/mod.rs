//! Protocol module containing command codes, the packet codec, and the
//! info-response view.

pub mod codec;
pub mod commands;
pub mod info;

pub use codec::{decode, encode, CommandPacket, ProtocolError};
pub use commands::*;
pub use info::{InfoError, InfoPacket};
