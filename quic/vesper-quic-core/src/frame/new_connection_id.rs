// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    frame::Tag,
    stateless_reset,
    varint::VarInt,
};
use vesper_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

pub const NEW_CONNECTION_ID_TAG: Tag = 0x18;

/// Issues a new connection ID together with its stateless reset token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewConnectionId {
    pub sequence_number: VarInt,
    pub retire_prior_to: VarInt,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: stateless_reset::Token,
}

impl NewConnectionId {
    #[inline]
    pub const fn tag(&self) -> Tag {
        NEW_CONNECTION_ID_TAG
    }
}

impl<'a> DecoderValue<'a> for NewConnectionId {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
        let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# Receipt of the same frame multiple times MUST NOT be treated as a
        //# connection error.  A receiver MUST ignore any Retire Prior To
        //# fields that do not increase the largest received Retire Prior To
        //# value.
        //
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# The value in the Retire Prior To field MUST be less than or equal
        //# to the value in the Sequence Number field.
        if retire_prior_to > sequence_number {
            return Err(DecoderError::InvariantViolation(
                "retire_prior_to exceeds sequence_number",
            ));
        }

        let (len, buffer) = buffer.decode::<u8>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# Values less than 1 and greater than 20 are invalid and MUST be
        //# treated as a connection error of type FRAME_ENCODING_ERROR.
        if !(1..=20).contains(&len) {
            return Err(DecoderError::InvariantViolation(
                "invalid connection id length",
            ));
        }

        let (id_slice, buffer) = buffer.decode_slice(len as usize)?;
        let connection_id = ConnectionId::try_from(id_slice.into_less_safe_slice())
            .map_err(|_| DecoderError::InvariantViolation("invalid connection id length"))?;

        let (token_bytes, buffer) = buffer.decode::<[u8; stateless_reset::TOKEN_LEN]>()?;

        Ok((
            Self {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token: token_bytes.into(),
            },
            buffer,
        ))
    }
}

impl EncoderValue for NewConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&NEW_CONNECTION_ID_TAG);
        encoder.encode(&self.sequence_number);
        encoder.encode(&self.retire_prior_to);
        self.connection_id.encode_with_len_prefix(encoder);
        encoder.write_slice(self.stateless_reset_token.as_bytes());
    }
}
