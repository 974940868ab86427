// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::encoder::{Encoder, EncoderLenEstimator};

/// A value which can be encoded into an [`Encoder`]
pub trait EncoderValue {
    fn encode<E: Encoder>(&self, encoder: &mut E);

    /// Returns the number of bytes `encode` will write
    #[inline]
    fn encoding_size(&self) -> usize {
        let mut estimator = EncoderLenEstimator::new();
        self.encode(&mut estimator);
        estimator.len()
    }
}

impl<T: EncoderValue + ?Sized> EncoderValue for &T {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        (**self).encode(encoder)
    }
}

impl<T: EncoderValue> EncoderValue for Option<T> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        if let Some(value) = self {
            value.encode(encoder)
        }
    }
}

macro_rules! encoder_value_endian {
    ($ty:ident, $size:expr) => {
        impl EncoderValue for $ty {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                encoder.write_slice(&self.to_be_bytes())
            }
        }
    };
}

encoder_value_endian!(u8, 1);
encoder_value_endian!(u16, 2);
encoder_value_endian!(u32, 4);
encoder_value_endian!(u64, 8);

impl EncoderValue for [u8] {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self)
    }
}

impl<const LEN: usize> EncoderValue for [u8; LEN] {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self[..])
    }
}

#[cfg(feature = "bytes")]
impl EncoderValue for bytes::Bytes {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderBuffer;

    #[test]
    fn primitive_encoding_matches_decoder() {
        let mut storage = [0u8; 15];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&0x1234u16);
        encoder.encode(&0x5678_9abcu32);
        encoder.encode(&1u8);
        encoder.encode(&0x1122_3344_5566_7788u64);
        assert_eq!(encoder.remaining_capacity(), 0);

        let buffer = crate::DecoderBuffer::new(&storage);
        let (a, buffer) = buffer.decode::<u16>().unwrap();
        let (b, buffer) = buffer.decode::<u32>().unwrap();
        let (c, buffer) = buffer.decode::<u8>().unwrap();
        let (d, buffer) = buffer.decode::<u64>().unwrap();
        assert_eq!((a, b, c, d), (0x1234, 0x5678_9abc, 1, 0x1122_3344_5566_7788));
        assert!(buffer.is_empty());
    }

    #[test]
    fn u64_round_trip_property() {
        bolero::check!().with_type::<u64>().for_each(|value| {
            let mut storage = [0u8; 8];
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(value);
            let (decoded, _) = crate::DecoderBuffer::new(&storage).decode::<u64>().unwrap();
            assert_eq!(decoded, *value);
        });
    }

    #[test]
    fn encoding_size_matches_encode() {
        assert_eq!(0u8.encoding_size(), 1);
        assert_eq!(0u16.encoding_size(), 2);
        assert_eq!([0u8; 7].encoding_size(), 7);
        assert_eq!(Some(3u32).encoding_size(), 4);
        assert_eq!(Option::<u32>::None.encoding_size(), 0);
    }
}
