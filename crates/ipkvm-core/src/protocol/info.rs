//! View over the chip's `GET_INFO` reply payload.
//!
//! Layout of the first three data bytes:
//!
//! | Byte | Meaning |
//! |------|---------|
//! | 0 | firmware version, `0x30 + (version * 10 - 10)` |
//! | 1 | USB host connection flag, non-zero = enumerated |
//! | 2 | lock LEDs: bit 0 Num, bit 1 Caps, bit 2 Scroll |

use thiserror::Error;

/// Lowest valid version byte (`V1.0`).
pub const VERSION_FLOOR: u8 = 0x30;

const NUM_LOCK_BIT: u8 = 1 << 0;
const CAPS_LOCK_BIT: u8 = 1 << 1;
const SCROLL_LOCK_BIT: u8 = 1 << 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InfoError {
    #[error("info payload needs 3 bytes, got {0}")]
    TooShort(usize),

    #[error("invalid chip version byte 0x{0:02X}")]
    Version(u8),
}

/// Decoded device information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoPacket {
    /// Raw version byte, always `>= 0x30`.
    pub version_byte: u8,
    pub is_connected: bool,
    pub num_lock: bool,
    pub caps_lock: bool,
    pub scroll_lock: bool,
}

impl InfoPacket {
    /// Builds the view from a reply payload.  Bytes past the third are ignored.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ipkvm_core::InfoPacket;
    ///
    /// let info = InfoPacket::from_payload(&[0x31, 0x01, 0x05]).unwrap();
    /// assert_eq!(info.chip_version(), "V1.1");
    /// assert!(info.num_lock && info.scroll_lock && !info.caps_lock);
    /// ```
    pub fn from_payload(payload: &[u8]) -> Result<Self, InfoError> {
        let [version_byte, connected, locks, ..] = *payload else {
            return Err(InfoError::TooShort(payload.len()));
        };
        if version_byte < VERSION_FLOOR {
            return Err(InfoError::Version(version_byte));
        }
        Ok(Self {
            version_byte,
            is_connected: connected != 0,
            num_lock: locks & NUM_LOCK_BIT != 0,
            caps_lock: locks & CAPS_LOCK_BIT != 0,
            scroll_lock: locks & SCROLL_LOCK_BIT != 0,
        })
    }

    /// Human-readable version such as `"V1.1"`.
    pub fn chip_version(&self) -> String {
        let steps = self.version_byte.saturating_sub(VERSION_FLOOR);
        format!("V{}.{}", 1 + steps / 10, steps % 10)
    }

    /// Inverse of [`InfoPacket::chip_version`]: `"V1.3"` → `0x33`.
    pub fn encode_version(text: &str) -> Option<u8> {
        let (major, minor) = text.strip_prefix('V')?.split_once('.')?;
        let major: u8 = major.parse().ok()?;
        let minor: u8 = minor.parse().ok()?;
        if major == 0 || minor > 9 {
            return None;
        }
        (major - 1)
            .checked_mul(10)?
            .checked_add(minor)?
            .checked_add(VERSION_FLOOR)
    }

    /// Packs the three lock flags back into the wire bit layout.
    pub fn lock_bits(&self) -> u8 {
        let mut bits = 0;
        if self.num_lock {
            bits |= NUM_LOCK_BIT;
        }
        if self.caps_lock {
            bits |= CAPS_LOCK_BIT;
        }
        if self.scroll_lock {
            bits |= SCROLL_LOCK_BIT;
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_payload_decodes_reference_example() {
        let info = InfoPacket::from_payload(&[0x31, 0x01, 0x05]).unwrap();
        assert_eq!(info.chip_version(), "V1.1");
        assert!(info.is_connected);
        assert!(info.num_lock);
        assert!(!info.caps_lock);
        assert!(info.scroll_lock);
    }

    #[test]
    fn test_from_payload_rejects_version_below_floor() {
        assert_eq!(
            InfoPacket::from_payload(&[0x2F, 0x01, 0x00]),
            Err(InfoError::Version(0x2F))
        );
    }

    #[test]
    fn test_from_payload_rejects_short_payload() {
        assert_eq!(InfoPacket::from_payload(&[0x31]), Err(InfoError::TooShort(1)));
    }

    #[test]
    fn test_from_payload_ignores_trailing_bytes() {
        let info = InfoPacket::from_payload(&[0x30, 0x00, 0x02, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(info.chip_version(), "V1.0");
        assert!(!info.is_connected);
        assert!(info.caps_lock);
    }

    #[test]
    fn test_chip_version_rolls_major_every_ten_steps() {
        let info = InfoPacket::from_payload(&[0x3A, 0x01, 0x00]).unwrap();
        assert_eq!(info.chip_version(), "V2.0");
    }

    #[test]
    fn test_encode_version_inverts_chip_version() {
        for byte in 0x30..=0x60u8 {
            let info = InfoPacket::from_payload(&[byte, 0, 0]).unwrap();
            assert_eq!(InfoPacket::encode_version(&info.chip_version()), Some(byte));
        }
    }

    #[test]
    fn test_encode_version_rejects_garbage() {
        assert_eq!(InfoPacket::encode_version("1.1"), None);
        assert_eq!(InfoPacket::encode_version("V0.5"), None);
        assert_eq!(InfoPacket::encode_version("Vx.y"), None);
    }

    #[test]
    fn test_lock_bits_round_trip() {
        let info = InfoPacket::from_payload(&[0x31, 0x01, 0x07]).unwrap();
        assert_eq!(info.lock_bits(), 0x07);
    }
}
