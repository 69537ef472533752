//! Command codes and framing constants of the HID-emulation chip protocol.

use serde::{Deserialize, Serialize};

// ── Framing constants ─────────────────────────────────────────────────────────

/// First magic byte of every packet.
pub const MAGIC1: u8 = 0x57;

/// Second magic byte of every packet.
pub const MAGIC2: u8 = 0xAB;

/// Both magic bytes in wire order.
pub const MAGIC: [u8; 2] = [MAGIC1, MAGIC2];

/// Magic (2) + ADDR (1) + CMD (1) + LEN (1).
pub const HEADER_SIZE: usize = 5;

/// Smallest possible packet: header plus checksum, no data.
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE + 1;

/// Largest payload that fits the one-byte LEN field.
pub const MAX_DATA_LEN: usize = u8::MAX as usize;

/// Address byte used for every command sent by the bridge.
pub const DEFAULT_ADDR: u8 = 0x00;

/// Full length of the chip's reply to `GET_INFO`: header, 8 data bytes, checksum.
pub const INFO_RESPONSE_SIZE: usize = 14;

// ── Command codes ─────────────────────────────────────────────────────────────

/// All command codes understood by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CmdCode {
    GetInfo = 0x01,
    SendKbGeneralData = 0x02,
    SendKbMediaData = 0x03,
    SendMsAbsData = 0x04,
    SendMsRelData = 0x05,
    SendMyHidData = 0x06,
    ReadMyHidData = 0x87,
    GetParaCfg = 0x08,
    SetParaCfg = 0x09,
    GetUsbString = 0x0A,
    SetUsbString = 0x0B,
    SetDefaultCfg = 0x0C,
    Reset = 0x0F,
}

impl From<CmdCode> for u8 {
    fn from(code: CmdCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for CmdCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(CmdCode::GetInfo),
            0x02 => Ok(CmdCode::SendKbGeneralData),
            0x03 => Ok(CmdCode::SendKbMediaData),
            0x04 => Ok(CmdCode::SendMsAbsData),
            0x05 => Ok(CmdCode::SendMsRelData),
            0x06 => Ok(CmdCode::SendMyHidData),
            0x87 => Ok(CmdCode::ReadMyHidData),
            0x08 => Ok(CmdCode::GetParaCfg),
            0x09 => Ok(CmdCode::SetParaCfg),
            0x0A => Ok(CmdCode::GetUsbString),
            0x0B => Ok(CmdCode::SetUsbString),
            0x0C => Ok(CmdCode::SetDefaultCfg),
            0x0F => Ok(CmdCode::Reset),
            _ => Err(()),
        }
    }
}
