//! Property tests for the device packet codec.
//!
//! These exercise the public `encode`/`decode` pair across the full input
//! space: every address, command, and payload length the LEN byte allows.

use ipkvm_core::protocol::commands::MAGIC1;
use ipkvm_core::{decode, encode, ProtocolError};
use proptest::prelude::*;

fn noise() -> impl Strategy<Value = Vec<u8>> {
    // Strip the first magic byte so the noise can never contain the magic pair.
    prop::collection::vec(any::<u8>().prop_filter("not magic", |b| *b != MAGIC1), 0..64)
}

proptest! {
    #[test]
    fn test_encode_then_decode_recovers_fields(
        addr in any::<u8>(),
        cmd in any::<u8>(),
        data in prop::collection::vec(any::<u8>(), 0..=255),
    ) {
        let bytes = encode(addr, cmd, &data);
        let (packet, consumed) = decode(&bytes).unwrap();
        prop_assert_eq!(packet.addr, addr);
        prop_assert_eq!(packet.cmd, cmd);
        prop_assert_eq!(packet.data, data);
        prop_assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_leading_noise_is_skipped(
        prefix in noise(),
        cmd in any::<u8>(),
        data in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut input = prefix.clone();
        input.extend_from_slice(&encode(0x00, cmd, &data));
        let (packet, consumed) = decode(&input).unwrap();
        prop_assert_eq!(packet.cmd, cmd);
        prop_assert_eq!(packet.data, data);
        prop_assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_single_corrupted_data_byte_is_detected(
        cmd in any::<u8>(),
        data in prop::collection::vec(any::<u8>(), 1..64),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut bytes = encode(0x00, cmd, &data);
        let target = 5 + index.index(data.len());
        bytes[target] ^= flip;
        let is_mismatch = matches!(decode(&bytes), Err(ProtocolError::ChecksumMismatch { .. }));
        prop_assert!(is_mismatch);
    }

    #[test]
    fn test_truncated_packet_never_decodes(
        data in prop::collection::vec(any::<u8>(), 0..32),
        cut in 1usize..6,
    ) {
        let bytes = encode(0x00, 0x81, &data);
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(decode(&bytes[..keep]).is_err());
    }
}
