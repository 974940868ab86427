// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use vesper_codec::EncoderBuffer;

fn round_trip(value: u64) -> usize {
    let value = VarInt::new(value).unwrap();
    let mut storage = [0u8; 8];
    let len = {
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&value);
        encoder.len()
    };
    let (decoded, remaining) = DecoderBuffer::new(&storage[..len])
        .decode::<VarInt>()
        .unwrap();
    assert!(remaining.is_empty());
    assert_eq!(decoded, value);
    len
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# | 00   | 1      | 6           | 0-63                  |
//# | 01   | 2      | 14          | 0-16383               |
//# | 10   | 4      | 30          | 0-1073741823          |
//# | 11   | 8      | 62          | 0-4611686018427387903 |

#[test]
fn class_edges() {
    assert_eq!(round_trip(0), 1);
    assert_eq!(round_trip(63), 1);
    assert_eq!(round_trip(64), 2);
    assert_eq!(round_trip(16_383), 2);
    assert_eq!(round_trip(16_384), 4);
    assert_eq!(round_trip(1_073_741_823), 4);
    assert_eq!(round_trip(1_073_741_824), 8);
    assert_eq!(round_trip(MAX_VARINT_VALUE), 8);
}

//= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
//# For example, the eight-byte sequence 0xc2197c5eff14e88c decodes to
//# the decimal value 151,288,809,941,952,652;

#[test]
fn rfc_examples() {
    let examples: &[(&[u8], u64)] = &[
        (&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c], 151_288_809_941_952_652),
        (&[0x9d, 0x7f, 0x3e, 0x7d], 494_878_333),
        (&[0x7b, 0xbd], 15_293),
        (&[0x25], 37),
    ];

    for (bytes, expected) in examples {
        let (value, remaining) = DecoderBuffer::new(bytes).decode::<VarInt>().unwrap();
        assert!(remaining.is_empty());
        assert_eq!(value.as_u64(), *expected);
        assert_eq!(round_trip(*expected), bytes.len());
    }
}

#[test]
fn truncated_input_fails() {
    for bytes in [&[0x7b][..], &[0x9d, 0x7f, 0x3e][..], &[0xc2][..]] {
        assert!(matches!(
            DecoderBuffer::new(bytes).decode::<VarInt>(),
            Err(DecoderError::UnexpectedEof(_))
        ));
    }
}

#[test]
fn out_of_range_rejected() {
    assert!(VarInt::new(MAX_VARINT_VALUE).is_ok());
    assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
    assert!(VarInt::MAX.checked_add(VarInt::from_u8(1)).is_none());
    assert_eq!(VarInt::MAX.saturating_add(VarInt::MAX), VarInt::MAX);
}

#[test]
fn round_trip_property() {
    bolero::check!()
        .with_type::<VarInt>()
        .for_each(|value| {
            round_trip(value.as_u64());
        });
}

#[test]
fn checked_arithmetic() {
    let a = VarInt::from_u32(100);
    let b = VarInt::from_u32(42);
    assert_eq!(a.checked_sub(b).unwrap().as_u64(), 58);
    assert!(b.checked_sub(a).is_none());
    assert_eq!(b.saturating_sub(a), VarInt::ZERO);
    assert_eq!(a.checked_mul(b).unwrap().as_u64(), 4200);
}
