// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.17
//# Endpoints can use PATH_CHALLENGE frames (type=0x1a) to check
//# reachability to the peer and for path validation during connection
//# migration.

pub const PATH_CHALLENGE_TAG: Tag = 0x1a;

/// The length of the unpredictable payload
pub const DATA_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathChallenge {
    pub data: [u8; DATA_LEN],
}

impl PathChallenge {
    #[inline]
    pub const fn tag(&self) -> Tag {
        PATH_CHALLENGE_TAG
    }
}

impl<'a> DecoderValue<'a> for PathChallenge {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (data, buffer) = buffer.decode()?;
        Ok((Self { data }, buffer))
    }
}

impl EncoderValue for PathChallenge {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&PATH_CHALLENGE_TAG);
        encoder.write_slice(&self.data);
    }
}
