// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use vesper_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
//# A server sends a NEW_TOKEN frame (type=0x07) to provide the client
//# with a token to send in the header of an Initial packet for a future
//# connection.

pub const NEW_TOKEN_TAG: Tag = 0x07;

/// An address validation token for a future connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewToken<'a> {
    pub token: &'a [u8],
}

impl<'a> NewToken<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        NEW_TOKEN_TAG
    }
}

impl<'a> DecoderValue<'a> for NewToken<'a> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (len, buffer) = buffer.decode::<VarInt>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
        //# A client MUST treat receipt of a NEW_TOKEN frame with an empty
        //# Token field as a connection error of type FRAME_ENCODING_ERROR.
        if len == VarInt::ZERO {
            return Err(DecoderError::InvariantViolation("empty NEW_TOKEN"));
        }

        let (token, buffer) = buffer.decode_slice(len.as_usize())?;
        Ok((
            Self {
                token: token.into_less_safe_slice(),
            },
            buffer,
        ))
    }
}

impl<'a> EncoderValue for NewToken<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&NEW_TOKEN_TAG);
        encoder.encode(&VarInt::try_from(self.token.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(self.token);
    }
}
