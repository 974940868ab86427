// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{DecoderParameterizedValue, Tag},
    varint::VarInt,
};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.

pub const CONNECTION_CLOSE_TRANSPORT_TAG: Tag = 0x1c;
pub const CONNECTION_CLOSE_APPLICATION_TAG: Tag = 0x1d;

/// Notifies the peer that the connection is being closed.
///
/// `frame_type` is present only in the transport variant (0x1c); its
/// absence marks an application-signaled close (0x1d).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    pub error_code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'a [u8],
}

impl<'a> ConnectionClose<'a> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            CONNECTION_CLOSE_TRANSPORT_TAG
        } else {
            CONNECTION_CLOSE_APPLICATION_TAG
        }
    }

    #[inline]
    pub const fn is_application_close(&self) -> bool {
        self.frame_type.is_none()
    }
}

impl<'a> DecoderParameterizedValue<'a> for ConnectionClose<'a> {
    type Parameter = Tag;

    #[inline]
    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (error_code, buffer) = buffer.decode::<VarInt>()?;

        let (frame_type, buffer) = if tag == CONNECTION_CLOSE_TRANSPORT_TAG {
            let (frame_type, buffer) = buffer.decode::<VarInt>()?;
            (Some(frame_type), buffer)
        } else {
            (None, buffer)
        };

        let (reason_len, buffer) = buffer.decode::<VarInt>()?;
        let (reason, buffer) = buffer.decode_slice(reason_len.as_usize())?;

        Ok((
            Self {
                error_code,
                frame_type,
                reason: reason.into_less_safe_slice(),
            },
            buffer,
        ))
    }
}

impl<'a> EncoderValue for ConnectionClose<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.error_code);
        if let Some(frame_type) = self.frame_type {
            encoder.encode(&frame_type);
        }
        encoder.encode(&VarInt::try_from(self.reason.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(self.reason);
    }
}
