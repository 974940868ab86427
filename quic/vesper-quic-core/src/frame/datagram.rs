// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{DecoderParameterizedValue, Tag},
    varint::VarInt,
};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9221#section-4
//# DATAGRAM frames are used to transmit application data in an
//# unreliable manner.

pub const DATAGRAM_TAG: Tag = 0x30;
pub const DATAGRAM_WITH_LEN_TAG: Tag = 0x31;

const LEN_BIT: Tag = 0x01;

/// An unreliable application datagram.
///
/// When `is_last_frame` is set the length field is omitted and the
/// datagram extends to the end of the packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Datagram<'a> {
    pub is_last_frame: bool,
    pub data: &'a [u8],
}

impl<'a> Datagram<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        if self.is_last_frame {
            DATAGRAM_TAG
        } else {
            DATAGRAM_WITH_LEN_TAG
        }
    }
}

impl<'a> DecoderParameterizedValue<'a> for Datagram<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        if tag & LEN_BIT == LEN_BIT {
            let (len, buffer) = buffer.decode::<VarInt>()?;
            let (data, buffer) = buffer.decode_slice(len.as_usize())?;
            Ok((
                Self {
                    is_last_frame: false,
                    data: data.into_less_safe_slice(),
                },
                buffer,
            ))
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9221#section-4
            //# the Datagram Data field extends to the end of the packet
            let (data, buffer) = buffer.take_remaining();
            Ok((
                Self {
                    is_last_frame: true,
                    data: data.into_less_safe_slice(),
                },
                buffer,
            ))
        }
    }
}

impl<'a> EncoderValue for Datagram<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        if !self.is_last_frame {
            encoder.encode(&VarInt::try_from(self.data.len()).unwrap_or(VarInt::MAX));
        }
        encoder.write_slice(self.data);
    }
}
