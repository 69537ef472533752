//! Binary codec for the HID-emulation chip's command packets.
//!
//! Wire format:
//! ```text
//! [0x57][0xAB][addr:1][cmd:1][len:1][data:len][sum:1]
//! ```
//! `sum` is the low byte of `addr + cmd + len + Σdata`.  The magic pair is
//! not part of the sum.

use thiserror::Error;
use tracing::trace;

use crate::protocol::commands::{HEADER_SIZE, MAGIC, MAX_DATA_LEN, MIN_PACKET_SIZE};

/// Errors that can occur while building or decoding a packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// No `0x57 0xAB` pair anywhere in the input.
    #[error("no packet magic found in {0} bytes")]
    MagicNotFound(usize),

    /// A magic pair was found but the bytes after it do not cover the header,
    /// the declared data length and the checksum.
    #[error("truncated packet: need {needed} bytes after magic, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The trailing checksum byte disagrees with the recomputed sum.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The data does not fit the one-byte LEN field.
    #[error("payload of {0} bytes exceeds the 255-byte limit")]
    PayloadTooLong(usize),
}

/// A decoded (or about-to-be-encoded) command packet.
///
/// `len` and `checksum` are derived from `data` and not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub addr: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl CommandPacket {
    /// Builds a packet, rejecting data longer than 255 bytes.
    pub fn new(addr: u8, cmd: impl Into<u8>, data: Vec<u8>) -> Result<Self, ProtocolError> {
        if data.len() > MAX_DATA_LEN {
            return Err(ProtocolError::PayloadTooLong(data.len()));
        }
        Ok(Self {
            addr,
            cmd: cmd.into(),
            data,
        })
    }

    /// Value of the LEN field.
    pub fn len(&self) -> u8 {
        self.data.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn checksum(&self) -> u8 {
        checksum(self.addr, self.cmd, &self.data)
    }

    /// Serializes the packet to its wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self.addr, self.cmd, &self.data)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes one packet.
///
/// # Panics
///
/// Panics if `data` is longer than 255 bytes.  Use [`CommandPacket::new`] when
/// the length is not known to be valid.
///
/// # Examples
///
/// ```rust
/// use ipkvm_core::protocol::codec::{decode, encode};
///
/// let bytes = encode(0x00, 0x01, &[]);
/// assert_eq!(bytes, vec![0x57, 0xAB, 0x00, 0x01, 0x00, 0x01]);
/// let (packet, consumed) = decode(&bytes).unwrap();
/// assert_eq!(packet.cmd, 0x01);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode(addr: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
    assert!(
        data.len() <= MAX_DATA_LEN,
        "packet data must fit a one-byte length field, got {} bytes",
        data.len()
    );

    let mut buf = Vec::with_capacity(MIN_PACKET_SIZE + data.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(addr);
    buf.push(cmd);
    buf.push(data.len() as u8);
    buf.extend_from_slice(data);
    buf.push(checksum(addr, cmd, data));
    buf
}

/// Decodes the first packet found in `bytes`.
///
/// The input is scanned from offset 0 for the magic pair, so leading noise or
/// the tail of an earlier reply is skipped.  On success returns the packet and
/// the offset just past its checksum byte.
///
/// # Errors
///
/// [`ProtocolError::MagicNotFound`], [`ProtocolError::Truncated`] or
/// [`ProtocolError::ChecksumMismatch`].
pub fn decode(bytes: &[u8]) -> Result<(CommandPacket, usize), ProtocolError> {
    let start = find_magic(bytes).ok_or(ProtocolError::MagicNotFound(bytes.len()))?;
    if start > 0 {
        trace!("skipped {start} bytes of noise before packet magic");
    }

    let frame = &bytes[start..];
    require_len(frame, MIN_PACKET_SIZE)?;

    let addr = frame[2];
    let cmd = frame[3];
    let len = frame[4] as usize;
    let total = HEADER_SIZE + len + 1;
    require_len(frame, total)?;

    let data = &frame[HEADER_SIZE..HEADER_SIZE + len];
    let expected = checksum(addr, cmd, data);
    let actual = frame[total - 1];
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    Ok((
        CommandPacket {
            addr,
            cmd,
            data: data.to_vec(),
        },
        start + total,
    ))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn checksum(addr: u8, cmd: u8, data: &[u8]) -> u8 {
    data.iter()
        .fold(addr.wrapping_add(cmd).wrapping_add(data.len() as u8), |sum, b| {
            sum.wrapping_add(*b)
        })
}

fn find_magic(bytes: &[u8]) -> Option<usize> {
    bytes.windows(MAGIC.len()).position(|w| w == MAGIC)
}

fn require_len(frame: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if frame.len() < needed {
        Err(ProtocolError::Truncated {
            needed,
            available: frame.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::CmdCode;

    #[test]
    fn test_encode_keyboard_packet_matches_known_bytes() {
        // Arrange: left shift + 'a'
        let data = [0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];

        // Act
        let bytes = encode(0x00, CmdCode::SendKbGeneralData as u8, &data);

        // Assert: sum = 0x00 + 0x02 + 0x08 + 0x02 + 0x04 = 0x10
        assert_eq!(&bytes[..5], &[0x57, 0xAB, 0x00, 0x02, 0x08]);
        assert_eq!(&bytes[5..13], &data);
        assert_eq!(bytes[13], 0x10);
    }

    #[test]
    fn test_checksum_wraps_modulo_256() {
        let bytes = encode(0xFF, 0xFF, &[0xFF, 0xFF]);
        // 0xFF*4 + 0x02 = 0x3FE -> 0xFE
        assert_eq!(*bytes.last().unwrap(), 0xFE);
    }

    #[test]
    fn test_decode_empty_input_reports_magic_not_found() {
        assert_eq!(decode(&[]), Err(ProtocolError::MagicNotFound(0)));
    }

    #[test]
    fn test_decode_noise_only_reports_magic_not_found() {
        assert_eq!(
            decode(&[0x01, 0x02, 0x57, 0x03]),
            Err(ProtocolError::MagicNotFound(4))
        );
    }

    #[test]
    fn test_decode_header_without_checksum_is_truncated() {
        let err = decode(&[0x57, 0xAB, 0x00, 0x81, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                needed: 6,
                available: 5
            }
        );
    }

    #[test]
    fn test_decode_declared_length_beyond_input_is_truncated() {
        // LEN says 3 bytes, only 1 present plus no checksum
        let err = decode(&[0x57, 0xAB, 0x00, 0x81, 0x03, 0x31]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                needed: 9,
                available: 6
            }
        );
    }

    #[test]
    fn test_decode_skips_leading_noise_and_reports_end_offset() {
        // Arrange
        let mut input = vec![0x00, 0x13, 0xAB];
        let packet = encode(0x00, 0x81, &[0x31, 0x01, 0x05]);
        input.extend_from_slice(&packet);
        input.extend_from_slice(&[0xEE, 0xEE]);

        // Act
        let (decoded, end) = decode(&input).unwrap();

        // Assert
        assert_eq!(decoded.cmd, 0x81);
        assert_eq!(decoded.data, vec![0x31, 0x01, 0x05]);
        assert_eq!(end, 3 + packet.len());
    }

    #[test]
    fn test_decode_corrupted_checksum_byte_reports_mismatch() {
        let mut bytes = encode(0x00, 0x02, &[1, 2, 3]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_command_packet_new_rejects_oversized_payload() {
        let result = CommandPacket::new(0, CmdCode::SendMyHidData, vec![0; 256]);
        assert_eq!(result, Err(ProtocolError::PayloadTooLong(256)));
    }

    #[test]
    fn test_command_packet_to_bytes_matches_encode() {
        let packet = CommandPacket::new(0x01, CmdCode::GetInfo, vec![]).unwrap();
        assert_eq!(packet.to_bytes(), encode(0x01, 0x01, &[]));
        assert_eq!(packet.len(), 0);
        assert!(packet.is_empty());
        assert_eq!(packet.checksum(), 0x02);
    }

    #[test]
    #[should_panic(expected = "one-byte length field")]
    fn test_encode_panics_on_oversized_payload() {
        let _ = encode(0, 0, &[0u8; 300]);
    }
}
