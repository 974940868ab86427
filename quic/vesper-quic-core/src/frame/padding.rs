// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# A PADDING frame (type=0x00) has no semantic value.  PADDING frames
//# can be used to increase the size of a packet.

pub const PADDING_TAG: Tag = 0x00;
pub(crate) const PADDING_TAG_U64: u64 = 0x00;

/// A run of padding bytes.
///
/// Adjacent padding bytes decode as a single frame; `length` counts the
/// bytes after the first tag byte plus one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Padding {
    pub length: usize,
}

impl Padding {
    #[inline]
    pub const fn tag(&self) -> Tag {
        PADDING_TAG
    }
}

impl<'a> DecoderValue<'a> for Padding {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        // the tag byte has already been consumed; absorb the rest of the run
        let mut length = 1;
        let mut buffer = buffer;
        while buffer.peek_byte(0) == Ok(PADDING_TAG) {
            buffer = buffer.skip(1)?;
            length += 1;
        }
        Ok((Self { length }, buffer))
    }
}

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_repeated(self.length, PADDING_TAG);
    }
}
