// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::{path_challenge::DATA_LEN, Tag};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.18
//# A PATH_RESPONSE frame (type=0x1b) is sent in response to a
//# PATH_CHALLENGE frame.

pub const PATH_RESPONSE_TAG: Tag = 0x1b;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathResponse {
    pub data: [u8; DATA_LEN],
}

impl PathResponse {
    #[inline]
    pub const fn tag(&self) -> Tag {
        PATH_RESPONSE_TAG
    }
}

impl<'a> DecoderValue<'a> for PathResponse {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (data, buffer) = buffer.decode()?;
        Ok((Self { data }, buffer))
    }
}

impl EncoderValue for PathResponse {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&PATH_RESPONSE_TAG);
        encoder.write_slice(&self.data);
    }
}
