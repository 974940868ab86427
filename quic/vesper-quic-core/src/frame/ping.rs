// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.2
//# Endpoints can use PING frames (type=0x01) to verify that their peers
//# are still alive or to check reachability to the peer.

pub const PING_TAG: Tag = 0x01;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ping;

impl Ping {
    #[inline]
    pub const fn tag(&self) -> Tag {
        PING_TAG
    }
}

impl<'a> DecoderValue<'a> for Ping {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        Ok((Self, buffer))
    }
}

impl EncoderValue for Ping {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&PING_TAG);
    }
}
