// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
//# The server uses a HANDSHAKE_DONE frame (type=0x1e) to signal
//# confirmation of the handshake to the client.

pub const HANDSHAKE_DONE_TAG: Tag = 0x1e;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandshakeDone;

impl HandshakeDone {
    #[inline]
    pub const fn tag(&self) -> Tag {
        HANDSHAKE_DONE_TAG
    }
}

impl<'a> DecoderValue<'a> for HandshakeDone {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        Ok((Self, buffer))
    }
}

impl EncoderValue for HandshakeDone {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&HANDSHAKE_DONE_TAG);
    }
}
