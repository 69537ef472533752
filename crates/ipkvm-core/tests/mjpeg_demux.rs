//! Integration tests for the MJPEG demultiplexer with arbitrary chunking.

use bytes::Bytes;
use ipkvm_core::FrameDemuxer;
use proptest::prelude::*;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Frame bodies that cannot contain an end marker.
fn body() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>().prop_filter("no 0xFF", |b| *b != 0xFF), 0..200)
}

fn framed(body: &[u8]) -> Vec<u8> {
    let mut v = SOI.to_vec();
    v.extend_from_slice(body);
    v.extend_from_slice(&EOI);
    v
}

fn feed_in_chunks(input: &[u8], cuts: &[usize]) -> Vec<Bytes> {
    let mut demux = FrameDemuxer::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    for &cut in cuts {
        let end = (offset + cut).min(input.len());
        frames.extend(demux.push(&input[offset..end]));
        offset = end;
    }
    frames.extend(demux.push(&input[offset..]));
    frames
}

#[test]
fn test_garbage_then_two_frames_byte_by_byte() {
    // Arrange
    let mut input = b"garbage".to_vec();
    input.extend_from_slice(&framed(b"jpegA"));
    input.extend_from_slice(&framed(b"jpegB"));

    // Act
    let cuts = vec![1; input.len()];
    let frames = feed_in_chunks(&input, &cuts);

    // Assert
    assert_eq!(frames, vec![Bytes::from(framed(b"jpegA")), Bytes::from(framed(b"jpegB"))]);
}

proptest! {
    #[test]
    fn test_two_frames_survive_any_chunking(
        garbage in body(),
        a in body(),
        b in body(),
        cuts in prop::collection::vec(0usize..50, 0..20),
    ) {
        let mut input = garbage;
        input.extend_from_slice(&framed(&a));
        input.extend_from_slice(&framed(&b));

        let frames = feed_in_chunks(&input, &cuts);

        prop_assert_eq!(frames, vec![Bytes::from(framed(&a)), Bytes::from(framed(&b))]);
    }
}
