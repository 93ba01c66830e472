//! Stream-level codec behavior: PMS scenarios, corruption recovery and
//! chunking independence.

mod common;

use common::{pms_frame, pms_layout, pms_payload};
use framehook::codec::{ChecksumAlgorithm, FrameDecoder, FrameSpec, LengthField};
use framehook::decode::{read_u16, Endian};
use proptest::prelude::*;
use std::sync::Arc;

fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Vec<u8>> {
    decoder.feed(bytes).map(|f| f.payload().to_vec()).collect()
}

#[test]
fn test_pms_zero_readings() {
    let mut decoder = FrameDecoder::new(pms_layout());
    let frames: Vec<_> = decoder.feed(&pms_frame([0; 6])).collect();
    assert_eq!(frames.len(), 1);

    let payload = frames[0].payload();
    assert_eq!(payload.len(), 26);
    for field in 0..6 {
        assert_eq!(read_u16(payload, field * 2, Endian::Big), Some(0));
    }
}

#[test]
fn test_pms_flipped_checksum_then_valid_frame() {
    let mut bad = pms_frame([0; 6]);
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;

    let mut stream = bad;
    stream.extend(pms_frame([12, 25, 31, 12, 25, 31]));

    let mut decoder = FrameDecoder::new(pms_layout());
    let payloads = decode_all(&mut decoder, &stream);
    assert_eq!(payloads, vec![pms_payload([12, 25, 31, 12, 25, 31])]);

    let stats = decoder.stats();
    assert_eq!(stats.checksum_errors, 1);
    assert_eq!(stats.framing_errors, 0);
    assert_eq!(stats.frames, 1);
}

#[test]
fn test_garbage_between_frames() {
    let mut stream = vec![0x00, 0x42, 0x13, 0x37];
    stream.extend(pms_frame([1, 2, 3, 4, 5, 6]));
    stream.extend([0x4D, 0x42]);
    stream.extend(pms_frame([6, 5, 4, 3, 2, 1]));

    let mut decoder = FrameDecoder::new(pms_layout());
    let payloads = decode_all(&mut decoder, &stream);
    assert_eq!(
        payloads,
        vec![pms_payload([1, 2, 3, 4, 5, 6]), pms_payload([6, 5, 4, 3, 2, 1])]
    );
    assert_eq!(decoder.stats().checksum_errors, 0);
    assert!(decoder.stats().skipped_bytes >= 4);
}

#[test]
fn test_frame_spans_are_stream_offsets() {
    let first = pms_frame([1; 6]);
    let second = pms_frame([2; 6]);
    let mut stream = first.clone();
    stream.extend(&second);

    let mut decoder = FrameDecoder::new(pms_layout());
    let spans: Vec<_> = decoder.feed(&stream).map(|f| f.span()).collect();
    let len = first.len() as u64;
    assert_eq!(spans, vec![0..len, len..len * 2]);
}

#[test]
fn test_oversized_claim_is_framing_error() {
    // Claimed length 0x0400 is above the 64-byte maximum.
    let mut stream = vec![0x42, 0x4D, 0x04, 0x00];
    stream.extend(pms_frame([7; 6]));

    let mut decoder = FrameDecoder::new(pms_layout());
    let payloads = decode_all(&mut decoder, &stream);
    assert_eq!(payloads, vec![pms_payload([7; 6])]);
    assert_eq!(decoder.stats().framing_errors, 1);
}

#[test]
fn test_modbus_style_crc_frames() {
    let spec = FrameSpec {
        prefix: vec![0x01, 0x03],
        length_field: LengthField::Encoded {
            width: 1,
            endian: Endian::Big,
            meaning: Default::default(),
        },
        checksum: framehook::codec::ChecksumSpec {
            algorithm: ChecksumAlgorithm::Crc16,
            endian: Endian::Little,
            scope: vec![
                framehook::codec::ChecksumRegion::Prefix,
                framehook::codec::ChecksumRegion::Length,
                framehook::codec::ChecksumRegion::Payload,
            ],
        },
        ..FrameSpec::default()
    };
    let layout = Arc::new(spec.compile().unwrap());
    let wire = layout.encode(&[], &[0x00, 0xFA, 0x01, 0x2C]).unwrap();
    // 01 03 04 00 FA 01 2C + CRC16/MODBUS little endian
    let crc = ChecksumAlgorithm::Crc16.compute(&wire[..7]) as u16;
    assert_eq!(&wire[7..], &crc.to_le_bytes());

    let mut decoder = FrameDecoder::new(layout);
    let payloads = decode_all(&mut decoder, &wire);
    assert_eq!(payloads, vec![vec![0x00, 0xFA, 0x01, 0x2C]]);
}

fn stream_of(readings: &[[u16; 6]]) -> Vec<u8> {
    readings.iter().flat_map(|r| pms_frame(*r)).collect()
}

proptest! {
    #[test]
    fn test_chunking_does_not_change_frames(
        readings in prop::collection::vec(prop::array::uniform6(any::<u16>()), 1..8),
        cuts in prop::collection::vec(1usize..40, 0..20),
    ) {
        let stream = stream_of(&readings);

        let mut whole = FrameDecoder::new(pms_layout());
        let expected = decode_all(&mut whole, &stream);

        let mut chunked = FrameDecoder::new(pms_layout());
        let mut got = Vec::new();
        let mut rest = stream.as_slice();
        for cut in cuts {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at(cut.min(rest.len()));
            got.extend(decode_all(&mut chunked, head));
            rest = tail;
        }
        got.extend(decode_all(&mut chunked, rest));

        prop_assert_eq!(got, expected);
        prop_assert_eq!(whole.stats(), chunked.stats());
    }

    #[test]
    fn test_corrupted_frame_never_hides_the_next(
        first in prop::array::uniform6(any::<u16>()),
        second in prop::array::uniform6(any::<u16>()),
        flip in 4usize..32,
        mask in 1u8..=255,
    ) {
        let mut stream = pms_frame(first);
        stream[flip] ^= mask;
        stream.extend(pms_frame(second));

        let mut decoder = FrameDecoder::new(pms_layout());
        let payloads = decode_all(&mut decoder, &stream);
        prop_assert_eq!(payloads.last(), Some(&pms_payload(second)));
        prop_assert!(!payloads.contains(&pms_payload(first)) || first == second);
    }
}
