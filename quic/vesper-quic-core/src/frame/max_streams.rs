// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{AckElicitation, DecoderParameterizedValue, Tag},
    stream::StreamType,
    varint::VarInt,
};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.11
//# A MAX_STREAMS frame (type=0x12 or 0x13) informs the peer of the
//# cumulative number of streams of a given type it is permitted to open.

pub const MAX_STREAMS_BIDI_TAG: Tag = 0x12;
pub const MAX_STREAMS_UNI_TAG: Tag = 0x13;

/// Raises the cumulative stream-open limit for one directionality
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxStreams {
    pub stream_type: StreamType,
    pub maximum_streams: VarInt,
}

impl MaxStreams {
    #[inline]
    pub const fn tag(&self) -> Tag {
        match self.stream_type {
            StreamType::Bidirectional => MAX_STREAMS_BIDI_TAG,
            StreamType::Unidirectional => MAX_STREAMS_UNI_TAG,
        }
    }

    #[inline]
    pub const fn ack_elicitation(&self) -> AckElicitation {
        AckElicitation::Eliciting
    }
}

impl<'a> DecoderParameterizedValue<'a> for MaxStreams {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let stream_type = if tag == MAX_STREAMS_BIDI_TAG {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        };
        let (maximum_streams, buffer) = buffer.decode()?;
        Ok((
            Self {
                stream_type,
                maximum_streams,
            },
            buffer,
        ))
    }
}

impl EncoderValue for MaxStreams {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.maximum_streams);
    }
}
