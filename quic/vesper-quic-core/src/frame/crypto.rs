// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use vesper_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

pub const CRYPTO_TAG: Tag = 0x06;

/// A chunk of the TLS handshake byte stream at a given offset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crypto<'a> {
    pub offset: VarInt,
    pub data: &'a [u8],
}

impl<'a> Crypto<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        CRYPTO_TAG
    }

    /// The offset one past the last byte this frame carries
    #[inline]
    pub fn end_offset(&self) -> Option<VarInt> {
        self.offset.checked_add_usize(self.data.len())
    }
}

impl<'a> DecoderValue<'a> for Crypto<'a> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (offset, buffer) = buffer.decode::<VarInt>()?;
        let (len, buffer) = buffer.decode::<VarInt>()?;
        let (data, buffer) = buffer.decode_slice(len.as_usize())?;
        let frame = Self {
            offset,
            data: data.into_less_safe_slice(),
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
        //# The stream does not have an explicit end, so CRYPTO frames do not
        //# have a FIN bit.
        if frame.end_offset().is_none() {
            return Err(DecoderError::InvariantViolation("crypto offset overflow"));
        }

        Ok((frame, buffer))
    }
}

impl<'a> EncoderValue for Crypto<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&CRYPTO_TAG);
        encoder.encode(&self.offset);
        encoder.encode(&VarInt::try_from(self.data.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(self.data);
    }
}
