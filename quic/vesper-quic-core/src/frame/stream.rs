// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{DecoderParameterizedValue, Tag},
    varint::VarInt,
};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# STREAM frames implicitly create a stream and carry stream data.  The
//# Type field in the STREAM frame takes the form 0b00001XXX (or the set
//# of values from 0x08 to 0x0f).

pub const STREAM_TAG_BASE: Tag = 0x08;

const OFF_BIT: Tag = 0x04;
const LEN_BIT: Tag = 0x02;
const FIN_BIT: Tag = 0x01;

/// A chunk of application stream data.
///
/// When `is_last_frame` is set the length field is omitted on the wire
/// and the data extends to the end of the packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stream<'a> {
    pub stream_id: VarInt,
    pub offset: VarInt,
    pub is_fin: bool,
    pub is_last_frame: bool,
    pub data: &'a [u8],
}

impl<'a> Stream<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        let mut tag = STREAM_TAG_BASE;
        if self.offset.as_u64() > 0 {
            tag |= OFF_BIT;
        }
        if !self.is_last_frame {
            tag |= LEN_BIT;
        }
        if self.is_fin {
            tag |= FIN_BIT;
        }
        tag
    }

    /// The offset one past the last byte this frame carries
    #[inline]
    pub fn end_offset(&self) -> Option<VarInt> {
        self.offset.checked_add_usize(self.data.len())
    }
}

impl<'a> DecoderParameterizedValue<'a> for Stream<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;

        let (offset, buffer) = if tag & OFF_BIT == OFF_BIT {
            buffer.decode::<VarInt>()?
        } else {
            (VarInt::ZERO, buffer)
        };

        let (data, is_last_frame, buffer) = if tag & LEN_BIT == LEN_BIT {
            let (len, buffer) = buffer.decode::<VarInt>()?;
            let (data, buffer) = buffer.decode_slice(len.as_usize())?;
            (data, false, buffer)
        } else {
            let (data, buffer) = buffer.take_remaining();
            (data, true, buffer)
        };

        let frame = Self {
            stream_id,
            offset,
            is_fin: tag & FIN_BIT == FIN_BIT,
            is_last_frame,
            data: data.into_less_safe_slice(),
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
        //# The largest offset delivered on a stream -- the sum of the offset
        //# and data length -- cannot exceed 2^62-1, as it is not possible to
        //# provide flow control credit for that data.  Receipt of a frame
        //# that exceeds this limit MUST be treated as a connection error of
        //# type FRAME_ENCODING_ERROR or FLOW_CONTROL_ERROR.
        if frame.end_offset().is_none() {
            return Err(DecoderError::InvariantViolation("stream offset overflow"));
        }

        Ok((frame, buffer))
    }
}

impl<'a> EncoderValue for Stream<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let tag = self.tag();
        encoder.encode(&tag);
        encoder.encode(&self.stream_id);
        if tag & OFF_BIT == OFF_BIT {
            encoder.encode(&self.offset);
        }
        if tag & LEN_BIT == LEN_BIT {
            encoder.encode(&VarInt::try_from(self.data.len()).unwrap_or(VarInt::MAX));
        }
        encoder.write_slice(self.data);
    }
}
