// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The RFC 9000 frame set, plus the RFC 9221 DATAGRAM extension frame.
//!
//! Frames borrow payload bytes out of the decrypted packet, so decoding a
//! packet's frames performs no copies. Encoding goes through
//! [`EncoderValue`] into the datagram scratch buffer.

use crate::varint::VarInt;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

pub(crate) use vesper_codec::DecoderParameterizedValue;

/// Frame type identifier.
///
/// On the wire this is a varint; every type this crate understands fits in
/// a single byte.
pub type Tag = u8;

/// Defines a frame whose body is a fixed sequence of varint fields
macro_rules! simple_frame {
    (
        $(#[$docs:meta])*
        $name:ident, $tag:ident = $tag_value:expr, $elicitation:ident {
            $($field:ident),* $(,)?
        }
    ) => {
        pub const $tag: $crate::frame::Tag = $tag_value;

        $(#[$docs])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $crate::varint::VarInt,)*
        }

        impl $name {
            #[inline]
            pub const fn tag(&self) -> $crate::frame::Tag {
                $tag
            }

            #[inline]
            pub const fn ack_elicitation(&self) -> $crate::frame::AckElicitation {
                $crate::frame::AckElicitation::$elicitation
            }
        }

        impl<'a> vesper_codec::DecoderValue<'a> for $name {
            #[inline]
            fn decode(
                buffer: vesper_codec::DecoderBuffer<'a>,
            ) -> vesper_codec::DecoderBufferResult<'a, Self> {
                $(let ($field, buffer) = buffer.decode()?;)*
                Ok((Self { $($field,)* }, buffer))
            }
        }

        impl vesper_codec::EncoderValue for $name {
            #[inline]
            fn encode<E: vesper_codec::Encoder>(&self, encoder: &mut E) {
                encoder.encode(&$tag);
                $(encoder.encode(&self.$field);)*
            }
        }
    };
}

pub mod ack;
pub mod connection_close;
pub mod crypto;
pub mod datagram;
pub mod handshake_done;
pub mod max_data;
pub mod max_stream_data;
pub mod max_streams;
pub mod new_connection_id;
pub mod new_token;
pub mod padding;
pub mod path_challenge;
pub mod path_response;
pub mod ping;
pub mod reset_stream;
pub mod stop_sending;
pub mod stream;
pub mod stream_blocked;

pub use ack::Ack;
pub use connection_close::ConnectionClose;
pub use crypto::Crypto;
pub use datagram::Datagram;
pub use handshake_done::HandshakeDone;
pub use max_data::MaxData;
pub use max_stream_data::MaxStreamData;
pub use max_streams::MaxStreams;
pub use new_connection_id::NewConnectionId;
pub use new_token::NewToken;
pub use padding::Padding;
pub use path_challenge::PathChallenge;
pub use path_response::PathResponse;
pub use ping::Ping;
pub use reset_stream::ResetStream;
pub use stop_sending::StopSending;
pub use stream::Stream;
pub use stream_blocked::{DataBlocked, StreamDataBlocked, StreamsBlocked};

#[cfg(test)]
mod tests;

//= https://www.rfc-editor.org/rfc/rfc9002#section-2
//# Ack-eliciting packets:  Packets that contain ack-eliciting frames
//#    elicit an ACK from the receiver within the maximum acknowledgment
//#    delay and are called ack-eliciting packets.

/// Whether a frame requires the peer to send an acknowledgment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckElicitation {
    #[default]
    NonEliciting,
    Eliciting,
}

impl AckElicitation {
    #[inline]
    pub fn is_ack_eliciting(self) -> bool {
        matches!(self, Self::Eliciting)
    }

    /// Merges the elicitation of several frames in one packet
    #[inline]
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

/// A single decoded frame borrowing from the packet payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack),
    ResetStream(ResetStream),
    StopSending(StopSending),
    Crypto(Crypto<'a>),
    NewToken(NewToken<'a>),
    Stream(Stream<'a>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    MaxStreams(MaxStreams),
    DataBlocked(DataBlocked),
    StreamDataBlocked(StreamDataBlocked),
    StreamsBlocked(StreamsBlocked),
    NewConnectionId(NewConnectionId),
    RetireConnectionId(RetireConnectionId),
    PathChallenge(PathChallenge),
    PathResponse(PathResponse),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
    Datagram(Datagram<'a>),
}

simple_frame!(
    /// Requests retirement of a previously issued connection ID
    RetireConnectionId, RETIRE_CONNECTION_ID_TAG = 0x19, Eliciting {
        sequence_number,
    }
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
//# The Frame Type field uses a variable-length integer encoding, with
//# one exception.  To ensure simple and efficient implementations of
//# frame parsing, a frame type MUST use the shortest possible encoding.

/// Returns true for frame types reserved for greasing (27 + 31·n),
/// which are ignored rather than rejected
#[inline]
fn is_grease_tag(tag: u64) -> bool {
    tag >= 27 && (tag - 27) % 31 == 0
}

impl<'a> Frame<'a> {
    /// Decodes a single frame from the front of a decrypted payload
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Option<Frame<'a>>> {
        let (tag, buffer) = buffer.decode::<VarInt>()?;

        macro_rules! frame {
            ($module:ident, $variant:ident) => {{
                let (frame, buffer) = buffer.decode::<$module::$variant>()?;
                Ok((Some(Frame::$variant(frame)), buffer))
            }};
        }

        match tag.as_u64() {
            padding::PADDING_TAG_U64 => {
                // coalesce a run of padding bytes into one frame
                let (padding, buffer) = buffer.decode::<Padding>()?;
                Ok((Some(Frame::Padding(padding)), buffer))
            }
            0x01 => frame!(ping, Ping),
            0x02..=0x03 => {
                let (frame, buffer) = buffer.decode_parameterized::<Ack>(tag.as_u64() as Tag)?;
                Ok((Some(Frame::Ack(frame)), buffer))
            }
            0x04 => frame!(reset_stream, ResetStream),
            0x05 => frame!(stop_sending, StopSending),
            0x06 => frame!(crypto, Crypto),
            0x07 => frame!(new_token, NewToken),
            0x08..=0x0f => {
                let (frame, buffer) =
                    buffer.decode_parameterized::<Stream>(tag.as_u64() as Tag)?;
                Ok((Some(Frame::Stream(frame)), buffer))
            }
            0x10 => frame!(max_data, MaxData),
            0x11 => frame!(max_stream_data, MaxStreamData),
            0x12..=0x13 => {
                let (frame, buffer) =
                    buffer.decode_parameterized::<MaxStreams>(tag.as_u64() as Tag)?;
                Ok((Some(Frame::MaxStreams(frame)), buffer))
            }
            0x14 => frame!(stream_blocked, DataBlocked),
            0x15 => frame!(stream_blocked, StreamDataBlocked),
            0x16..=0x17 => {
                let (frame, buffer) =
                    buffer.decode_parameterized::<StreamsBlocked>(tag.as_u64() as Tag)?;
                Ok((Some(Frame::StreamsBlocked(frame)), buffer))
            }
            0x18 => frame!(new_connection_id, NewConnectionId),
            0x19 => {
                let (frame, buffer) = buffer.decode::<RetireConnectionId>()?;
                Ok((Some(Frame::RetireConnectionId(frame)), buffer))
            }
            0x1a => frame!(path_challenge, PathChallenge),
            0x1b => frame!(path_response, PathResponse),
            0x1c..=0x1d => {
                let (frame, buffer) =
                    buffer.decode_parameterized::<ConnectionClose>(tag.as_u64() as Tag)?;
                Ok((Some(Frame::ConnectionClose(frame)), buffer))
            }
            0x1e => frame!(handshake_done, HandshakeDone),
            0x30..=0x31 => {
                let (frame, buffer) =
                    buffer.decode_parameterized::<Datagram>(tag.as_u64() as Tag)?;
                Ok((Some(Frame::Datagram(frame)), buffer))
            }
            value if is_grease_tag(value) => {
                // reserved-for-grease types carry no content and are skipped
                Ok((None, buffer))
            }
            _ => Err(DecoderError::InvariantViolation("unknown frame type")),
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        match self {
            Frame::Padding(frame) => frame.tag(),
            Frame::Ping(frame) => frame.tag(),
            Frame::Ack(frame) => frame.tag(),
            Frame::ResetStream(frame) => frame.tag(),
            Frame::StopSending(frame) => frame.tag(),
            Frame::Crypto(frame) => frame.tag(),
            Frame::NewToken(frame) => frame.tag(),
            Frame::Stream(frame) => frame.tag(),
            Frame::MaxData(frame) => frame.tag(),
            Frame::MaxStreamData(frame) => frame.tag(),
            Frame::MaxStreams(frame) => frame.tag(),
            Frame::DataBlocked(frame) => frame.tag(),
            Frame::StreamDataBlocked(frame) => frame.tag(),
            Frame::StreamsBlocked(frame) => frame.tag(),
            Frame::NewConnectionId(frame) => frame.tag(),
            Frame::RetireConnectionId(frame) => frame.tag(),
            Frame::PathChallenge(frame) => frame.tag(),
            Frame::PathResponse(frame) => frame.tag(),
            Frame::ConnectionClose(frame) => frame.tag(),
            Frame::HandshakeDone(frame) => frame.tag(),
            Frame::Datagram(frame) => frame.tag(),
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-2
    //# All frames other than ACK, PADDING, and CONNECTION_CLOSE are
    //# considered ack-eliciting.
    #[inline]
    pub fn ack_elicitation(&self) -> AckElicitation {
        match self {
            Frame::Padding(_) | Frame::Ack(_) | Frame::ConnectionClose(_) => {
                AckElicitation::NonEliciting
            }
            _ => AckElicitation::Eliciting,
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-9.1
    //# PATH_CHALLENGE, PATH_RESPONSE, NEW_CONNECTION_ID, and PADDING
    //# frames are "probing frames", and all other frames are "non-probing
    //# frames".
    #[inline]
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            Frame::Padding(_)
                | Frame::PathChallenge(_)
                | Frame::PathResponse(_)
                | Frame::NewConnectionId(_)
        )
    }

    /// Returns true if the frame counts toward bytes in flight
    #[inline]
    pub fn is_congestion_controlled(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::ConnectionClose(_))
    }
}

impl<'a> EncoderValue for Frame<'a> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Frame::Padding(frame) => frame.encode(encoder),
            Frame::Ping(frame) => frame.encode(encoder),
            Frame::Ack(frame) => frame.encode(encoder),
            Frame::ResetStream(frame) => frame.encode(encoder),
            Frame::StopSending(frame) => frame.encode(encoder),
            Frame::Crypto(frame) => frame.encode(encoder),
            Frame::NewToken(frame) => frame.encode(encoder),
            Frame::Stream(frame) => frame.encode(encoder),
            Frame::MaxData(frame) => frame.encode(encoder),
            Frame::MaxStreamData(frame) => frame.encode(encoder),
            Frame::MaxStreams(frame) => frame.encode(encoder),
            Frame::DataBlocked(frame) => frame.encode(encoder),
            Frame::StreamDataBlocked(frame) => frame.encode(encoder),
            Frame::StreamsBlocked(frame) => frame.encode(encoder),
            Frame::NewConnectionId(frame) => frame.encode(encoder),
            Frame::RetireConnectionId(frame) => frame.encode(encoder),
            Frame::PathChallenge(frame) => frame.encode(encoder),
            Frame::PathResponse(frame) => frame.encode(encoder),
            Frame::ConnectionClose(frame) => frame.encode(encoder),
            Frame::HandshakeDone(frame) => frame.encode(encoder),
            Frame::Datagram(frame) => frame.encode(encoder),
        }
    }
}

/// Iterates the frames of a decrypted packet payload
pub struct FrameIter<'a> {
    buffer: DecoderBuffer<'a>,
}

impl<'a> FrameIter<'a> {
    #[inline]
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            buffer: DecoderBuffer::new(payload),
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.buffer.is_empty() {
            match Frame::decode(self.buffer) {
                Ok((Some(frame), buffer)) => {
                    self.buffer = buffer;
                    return Some(Ok(frame));
                }
                Ok((None, buffer)) => {
                    // skipped grease frame
                    self.buffer = buffer;
                }
                Err(error) => {
                    // stop iterating after a malformed frame
                    self.buffer = DecoderBuffer::new(&[]);
                    return Some(Err(error));
                }
            }
        }
        None
    }
}
