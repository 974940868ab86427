// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The blocked-signal family.
//!
//! These frames are informational: they tell the peer a limit was hit, but
//! the peer's credit updates are driven by its own consumption accounting,
//! never by these frames alone.

use crate::{
    frame::{AckElicitation, DecoderParameterizedValue, Tag},
    stream::StreamType,
    varint::VarInt,
};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.12
//# A sender SHOULD send a DATA_BLOCKED frame (type=0x14) when it wishes
//# to send data but is unable to do so due to connection-level flow
//# control.

simple_frame!(
    /// Signals that connection-level flow control blocked a send
    DataBlocked, DATA_BLOCKED_TAG = 0x14, Eliciting {
        data_limit,
    }
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.13
//# A sender SHOULD send a STREAM_DATA_BLOCKED frame (type=0x15) when it
//# wishes to send data but is unable to do so due to stream-level flow
//# control.

simple_frame!(
    /// Signals that stream-level flow control blocked a send
    StreamDataBlocked, STREAM_DATA_BLOCKED_TAG = 0x15, Eliciting {
        stream_id,
        stream_data_limit,
    }
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.14
//# A sender SHOULD send a STREAMS_BLOCKED frame (type=0x16 or 0x17) when
//# it wishes to open a stream but is unable to do so due to the maximum
//# stream limit set by its peer.

pub const STREAMS_BLOCKED_BIDI_TAG: Tag = 0x16;
pub const STREAMS_BLOCKED_UNI_TAG: Tag = 0x17;

/// Signals that the cumulative stream limit blocked a stream open
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamsBlocked {
    pub stream_type: StreamType,
    pub stream_limit: VarInt,
}

impl StreamsBlocked {
    #[inline]
    pub const fn tag(&self) -> Tag {
        match self.stream_type {
            StreamType::Bidirectional => STREAMS_BLOCKED_BIDI_TAG,
            StreamType::Unidirectional => STREAMS_BLOCKED_UNI_TAG,
        }
    }

    #[inline]
    pub const fn ack_elicitation(&self) -> AckElicitation {
        AckElicitation::Eliciting
    }
}

impl<'a> DecoderParameterizedValue<'a> for StreamsBlocked {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let stream_type = if tag == STREAMS_BLOCKED_BIDI_TAG {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        };
        let (stream_limit, buffer) = buffer.decode()?;
        Ok((
            Self {
                stream_type,
                stream_limit,
            },
            buffer,
        ))
    }
}

impl EncoderValue for StreamsBlocked {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.stream_limit);
    }
}
