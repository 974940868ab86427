// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::{buffer::DecoderBufferResult, DecoderBuffer};
use byteorder::{ByteOrder, NetworkEndian};

/// A value which can be decoded from the front of a [`DecoderBuffer`]
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// A value whose decoding depends on an externally supplied parameter,
/// e.g. a frame body that varies with its tag byte.
pub trait DecoderParameterizedValue<'a>: Sized {
    type Parameter;

    fn decode_parameterized(
        parameter: Self::Parameter,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self>;
}

macro_rules! decoder_value_endian {
    ($ty:ident, $read:ident, $size:expr) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice($size)?;
                let value = NetworkEndian::$read(slice.into_less_safe_slice());
                Ok((value, buffer))
            }
        }
    };
}

impl<'a> DecoderValue<'a> for u8 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let value = buffer.peek_byte(0)?;
        let buffer = buffer.skip(1)?;
        Ok((value, buffer))
    }
}

decoder_value_endian!(u16, read_u16, 2);
decoder_value_endian!(u32, read_u32, 4);
decoder_value_endian!(u64, read_u64, 8);

impl<'a, const LEN: usize> DecoderValue<'a> for [u8; LEN] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice(LEN)?;
        let mut value = [0u8; LEN];
        value.copy_from_slice(slice.into_less_safe_slice());
        Ok((value, buffer))
    }
}

impl<'a> DecoderValue<'a> for &'a [u8] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.take_remaining();
        Ok((slice.into_less_safe_slice(), buffer))
    }
}

impl<'a> DecoderValue<'a> for DecoderBuffer<'a> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.take_remaining();
        Ok((slice, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_endian_round_trip() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];
        let buffer = DecoderBuffer::new(&bytes);

        let (value, _) = buffer.decode::<u16>().unwrap();
        assert_eq!(value, 0x1234);

        let (value, _) = buffer.decode::<u32>().unwrap();
        assert_eq!(value, 0x1234_5678);

        let (value, buffer) = buffer.decode::<u64>().unwrap();
        assert_eq!(value, 0x1234_5678_9abc_def0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn array_decode() {
        let bytes = [1, 2, 3, 4];
        let buffer = DecoderBuffer::new(&bytes);
        let (value, buffer) = buffer.decode::<[u8; 3]>().unwrap();
        assert_eq!(value, [1, 2, 3]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn remaining_slice_decode() {
        let bytes = [1, 2, 3, 4];
        let buffer = DecoderBuffer::new(&bytes).skip(1).unwrap();
        let (value, buffer) = buffer.decode::<&[u8]>().unwrap();
        assert_eq!(value, &[2, 3, 4]);
        assert!(buffer.is_empty());
    }
}
