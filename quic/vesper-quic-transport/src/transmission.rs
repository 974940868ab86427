// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outgoing packet assembly: frame planning, header encoding, payload
//! sealing, and header protection.

use crate::stream::SentRange;
use bytes::Bytes;
use smallvec::SmallVec;
use vesper_codec::{Encoder, EncoderBuffer, EncoderValue};
use vesper_quic_core::{
    application,
    connection::ConnectionId,
    crypto::{header_crypto, packet_protection, HeaderKey, Key},
    frame,
    packet::{
        long::{LongHeader, PacketType},
        number::{PacketNumber, PacketNumberSpace},
        short::ShortHeader,
        KeyPhase, Version,
    },
    path,
    stream::{StreamId, StreamType},
    transport,
    varint::VarInt,
};

/// A frame planned for the packet under construction.
///
/// Planned frames own their bytes (cheaply, via [`Bytes`]) so the packer
/// can hold them while it budgets the packet.
#[derive(Clone, Debug)]
pub enum PlannedFrame {
    Padding { len: usize },
    Ping,
    Ack(frame::Ack),
    Crypto { offset: VarInt, data: Bytes },
    Stream { id: StreamId, offset: u64, data: Bytes, fin: bool },
    ResetStream { id: StreamId, error: application::Error, final_size: VarInt },
    StopSending { id: StreamId, error: application::Error },
    MaxData { limit: VarInt },
    MaxStreamData { id: StreamId, limit: VarInt },
    MaxStreams { stream_type: StreamType, limit: VarInt },
    DataBlocked { limit: VarInt },
    StreamDataBlocked { id: StreamId, limit: VarInt },
    StreamsBlocked { stream_type: StreamType, limit: VarInt },
    RetireConnectionId { sequence: VarInt },
    PathChallenge { path_id: path::Id, data: [u8; 8] },
    PathResponse { data: [u8; 8] },
    ConnectionClose { error: transport::Error },
    ApplicationClose { error: application::Error, reason: Bytes },
    Datagram { data: Bytes },
}

impl PlannedFrame {
    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Self::Padding { len } => frame::Padding { length: *len }.encode(encoder),
            Self::Ping => frame::Ping.encode(encoder),
            Self::Ack(ack) => ack.encode(encoder),
            Self::Crypto { offset, data } => frame::Crypto {
                offset: *offset,
                data: data.as_ref(),
            }
            .encode(encoder),
            Self::Stream {
                id,
                offset,
                data,
                fin,
            } => frame::Stream {
                stream_id: id.as_varint(),
                offset: VarInt::new(*offset).unwrap_or(VarInt::MAX),
                is_fin: *fin,
                is_last_frame: false,
                data: data.as_ref(),
            }
            .encode(encoder),
            Self::ResetStream {
                id,
                error,
                final_size,
            } => frame::ResetStream {
                stream_id: id.as_varint(),
                application_error_code: error.as_varint(),
                final_size: *final_size,
            }
            .encode(encoder),
            Self::StopSending { id, error } => frame::StopSending {
                stream_id: id.as_varint(),
                application_error_code: error.as_varint(),
            }
            .encode(encoder),
            Self::MaxData { limit } => frame::MaxData {
                maximum_data: *limit,
            }
            .encode(encoder),
            Self::MaxStreamData { id, limit } => frame::MaxStreamData {
                stream_id: id.as_varint(),
                maximum_stream_data: *limit,
            }
            .encode(encoder),
            Self::MaxStreams { stream_type, limit } => frame::MaxStreams {
                stream_type: *stream_type,
                maximum_streams: *limit,
            }
            .encode(encoder),
            Self::DataBlocked { limit } => frame::DataBlocked { data_limit: *limit }.encode(encoder),
            Self::StreamDataBlocked { id, limit } => frame::StreamDataBlocked {
                stream_id: id.as_varint(),
                stream_data_limit: *limit,
            }
            .encode(encoder),
            Self::StreamsBlocked { stream_type, limit } => frame::StreamsBlocked {
                stream_type: *stream_type,
                stream_limit: *limit,
            }
            .encode(encoder),
            Self::RetireConnectionId { sequence } => frame::RetireConnectionId {
                sequence_number: *sequence,
            }
            .encode(encoder),
            Self::PathChallenge { data, .. } => {
                frame::PathChallenge { data: *data }.encode(encoder)
            }
            Self::PathResponse { data } => frame::PathResponse { data: *data }.encode(encoder),
            Self::ConnectionClose { error } => frame::ConnectionClose {
                error_code: error.code,
                frame_type: Some(error.frame_type.unwrap_or(VarInt::ZERO)),
                reason: error.reason.as_bytes(),
            }
            .encode(encoder),
            Self::ApplicationClose { error, reason } => frame::ConnectionClose {
                error_code: error.as_varint(),
                frame_type: None,
                reason: reason.as_ref(),
            }
            .encode(encoder),
            Self::Datagram { data } => frame::Datagram {
                is_last_frame: false,
                data: data.as_ref(),
            }
            .encode(encoder),
        }
    }

    pub fn encoding_size(&self) -> usize {
        let mut estimator = vesper_codec::EncoderLenEstimator::new();
        self.encode(&mut estimator);
        estimator.len()
    }

    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Self::Padding { .. }
                | Self::Ack(_)
                | Self::ConnectionClose { .. }
                | Self::ApplicationClose { .. }
        )
    }

    /// The retransmission bookkeeping entry for this frame
    pub fn manifest_entry(&self) -> Option<SentFrame> {
        Some(match self {
            Self::Padding { .. } | Self::Ping | Self::ConnectionClose { .. }
            | Self::ApplicationClose { .. } | Self::Datagram { .. } => return None,
            Self::Ack(ack) => SentFrame::Ack {
                largest: ack.largest_acknowledged(),
            },
            Self::Crypto { offset, data } => SentFrame::Crypto {
                offset: offset.as_u64(),
                len: data.len() as u64,
            },
            Self::Stream {
                id,
                offset,
                data,
                fin,
            } => SentFrame::Stream {
                id: *id,
                range: SentRange {
                    offset: *offset,
                    len: data.len() as u64,
                    fin: *fin,
                },
            },
            Self::ResetStream {
                id,
                error,
                final_size,
            } => SentFrame::ResetStream {
                id: *id,
                error: *error,
                final_size: *final_size,
            },
            Self::StopSending { id, .. } => SentFrame::StopSending { id: *id },
            Self::MaxData { .. } => SentFrame::MaxData,
            Self::MaxStreamData { id, .. } => SentFrame::MaxStreamData { id: *id },
            Self::MaxStreams { stream_type, .. } => SentFrame::MaxStreams {
                stream_type: *stream_type,
            },
            Self::DataBlocked { .. }
            | Self::StreamDataBlocked { .. }
            | Self::StreamsBlocked { .. } => return None,
            Self::RetireConnectionId { sequence } => SentFrame::RetireConnectionId {
                sequence: *sequence,
            },
            Self::PathChallenge { path_id, .. } => SentFrame::PathChallenge { path_id: *path_id },
            Self::PathResponse { .. } => return None,
        })
    }
}

/// What a sent packet carried, for ack/loss processing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentFrame {
    Ack { largest: u64 },
    Crypto { offset: u64, len: u64 },
    Stream { id: StreamId, range: SentRange },
    ResetStream { id: StreamId, error: application::Error, final_size: VarInt },
    StopSending { id: StreamId },
    MaxData,
    MaxStreamData { id: StreamId },
    MaxStreams { stream_type: StreamType },
    RetireConnectionId { sequence: VarInt },
    PathChallenge { path_id: path::Id },
}

/// The frames bundled into one packet
pub type Manifest = SmallVec<[SentFrame; 4]>;

/// The header recipe for the packet under construction
#[derive(Clone, Debug)]
pub enum HeaderPlan {
    Long {
        packet_type: PacketType,
        version: Version,
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        /// Initial token, empty otherwise
        token: Bytes,
    },
    Short {
        destination_cid: ConnectionId,
        key_phase: KeyPhase,
    },
}

impl HeaderPlan {
    pub fn space(&self) -> PacketNumberSpace {
        match self {
            Self::Long { packet_type, .. } => packet_type
                .space()
                .unwrap_or(PacketNumberSpace::ApplicationData),
            Self::Short { .. } => PacketNumberSpace::ApplicationData,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// The scratch buffer cannot hold the packet
    InsufficientSpace,
    /// The packet number cannot be represented against the largest acked
    PacketNumberTruncation,
    /// Sealing failed
    Crypto,
}

/// Assembles, seals, and protects one packet into `buffer`.
///
/// Returns the total packet length. The payload is padded up to the
/// minimum the header-protection sample requires.
pub fn build_packet<K: Key + ?Sized, H: HeaderKey + ?Sized>(
    buffer: &mut [u8],
    header: &HeaderPlan,
    packet_number: PacketNumber,
    largest_acked: Option<PacketNumber>,
    frames: &[PlannedFrame],
    key: &K,
    header_key: &H,
) -> Result<usize, BuildError> {
    let truncated = packet_number
        .truncate(largest_acked)
        .ok_or(BuildError::PacketNumberTruncation)?;
    let pn_len = truncated.len().bytesize();
    let tag_len = key.tag_len();

    let mut payload_len: usize = frames.iter().map(PlannedFrame::encoding_size).sum();

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
    //# An endpoint MUST adjust the size of its packet number encoding, or
    //# pad the packet, to ensure that there are at least 4 bytes prior to
    //# the sample and enough bytes after the packet number to sample.
    let padding = (header_crypto::SAMPLE_OFFSET + header_key.sample_len())
        .saturating_sub(pn_len + payload_len + tag_len);
    payload_len += padding;

    let mut encoder = EncoderBuffer::new(buffer);

    match header {
        HeaderPlan::Long {
            packet_type,
            version,
            destination_cid,
            source_cid,
            token,
        } => {
            let long = LongHeader {
                packet_type: *packet_type,
                version: *version,
                destination_cid: *destination_cid,
                source_cid: *source_cid,
            };
            let length = VarInt::try_from(pn_len + payload_len + tag_len)
                .map_err(|_| BuildError::InsufficientSpace)?;
            let total = long.encoding_size()
                + if packet_type.has_token() {
                    VarInt::try_from(token.len())
                        .map_err(|_| BuildError::InsufficientSpace)?
                        .encoding_size()
                        + token.len()
                } else {
                    0
                }
                + length.encoding_size()
                + pn_len
                + payload_len
                + tag_len;
            if total > encoder.capacity() {
                return Err(BuildError::InsufficientSpace);
            }

            long.encode_prefix(truncated, &mut encoder);
            if packet_type.has_token() {
                encoder.encode(&VarInt::try_from(token.len()).unwrap_or(VarInt::MAX));
                encoder.write_slice(token.as_ref());
            }
            encoder.encode(&length);
        }
        HeaderPlan::Short {
            destination_cid,
            key_phase,
        } => {
            let short = ShortHeader {
                destination_cid: *destination_cid,
                key_phase: *key_phase,
            };
            let total = short.pn_offset() + pn_len + payload_len + tag_len;
            if total > encoder.capacity() {
                return Err(BuildError::InsufficientSpace);
            }
            short.encode_prefix(truncated, &mut encoder);
        }
    }

    let pn_offset = encoder.len();
    truncated.encode(&mut encoder);

    for frame in frames {
        frame.encode(&mut encoder);
    }
    if padding > 0 {
        encoder.write_repeated(padding, 0);
    }
    // reserve the AEAD tag
    encoder.write_repeated(tag_len, 0);

    let packet_len = encoder.len();
    let packet = &mut buffer[..packet_len];

    packet_protection::encrypt_and_protect(
        header_key,
        key,
        packet_number,
        pn_offset,
        pn_len,
        packet,
    )
    .map_err(|_| BuildError::Crypto)?;

    Ok(packet_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_quic_core::{
        crypto::testing::{NullHeaderKey, NullKey},
        packet::{decoding, version::QUIC_V1},
        varint::VarInt,
    };

    fn pn(space: PacketNumberSpace, value: u64) -> PacketNumber {
        space.new_packet_number(VarInt::new(value).unwrap())
    }

    #[test]
    fn build_and_reparse_initial() {
        let mut buffer = [0u8; 1500];
        let header = HeaderPlan::Long {
            packet_type: PacketType::Initial,
            version: QUIC_V1,
            destination_cid: ConnectionId::try_from(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]).unwrap(),
            source_cid: ConnectionId::try_from(&[9u8, 10, 11, 12, 13, 14, 15, 16][..]).unwrap(),
            token: Bytes::new(),
        };
        let frames = [
            PlannedFrame::Crypto {
                offset: VarInt::ZERO,
                data: Bytes::from_static(b"client hello"),
            },
            PlannedFrame::Padding { len: 600 },
        ];

        let len = build_packet(
            &mut buffer,
            &header,
            pn(PacketNumberSpace::Initial, 0),
            None,
            &frames,
            &NullKey::default(),
            &NullHeaderKey::default(),
        )
        .unwrap();

        let (packet, remaining) = decoding::parse(&mut buffer[..len], 8).unwrap();
        assert!(remaining.is_empty());
        match packet {
            decoding::Packet::Protected(packet) => {
                assert_eq!(packet.space(), PacketNumberSpace::Initial);
                assert_eq!(packet.len(), len);
            }
            _ => panic!("expected protected packet"),
        }
    }

    #[test]
    fn short_packet_round_trip() {
        let mut buffer = [0u8; 1500];
        let dcid = ConnectionId::try_from(&[7u8; 8][..]).unwrap();
        let header = HeaderPlan::Short {
            destination_cid: dcid,
            key_phase: KeyPhase::Zero,
        };
        let frames = [PlannedFrame::Ping];
        let space = PacketNumberSpace::ApplicationData;

        let len = build_packet(
            &mut buffer,
            &header,
            pn(space, 42),
            None,
            &frames,
            &NullKey::default(),
            &NullHeaderKey::default(),
        )
        .unwrap();

        let (packet, _) = decoding::parse(&mut buffer[..len], 8).unwrap();
        let decoding::Packet::Protected(packet) = packet else {
            panic!("expected protected packet");
        };
        let pn_offset = packet.pn_offset;
        let mut bytes = packet.into_bytes();

        let (number, payload) = packet_protection::unprotect_and_decrypt(
            &NullHeaderKey::default(),
            &NullKey::default(),
            space,
            None,
            pn_offset,
            &mut bytes,
        )
        .unwrap();
        assert_eq!(number.as_u64(), 42);

        let mut frames_seen = 0;
        for decoded in frame::FrameIter::new(&bytes[payload]) {
            decoded.unwrap();
            frames_seen += 1;
        }
        assert!(frames_seen >= 1);
    }

    #[test]
    fn too_small_buffer_rejected() {
        let mut buffer = [0u8; 16];
        let header = HeaderPlan::Short {
            destination_cid: ConnectionId::try_from(&[7u8; 8][..]).unwrap(),
            key_phase: KeyPhase::Zero,
        };
        assert_eq!(
            build_packet(
                &mut buffer,
                &header,
                pn(PacketNumberSpace::ApplicationData, 0),
                None,
                &[PlannedFrame::Ping],
                &NullKey::default(),
                &NullHeaderKey::default(),
            ),
            Err(BuildError::InsufficientSpace)
        );
    }

    #[test]
    fn elicitation_and_manifest() {
        let ping = PlannedFrame::Ping;
        assert!(ping.is_ack_eliciting());
        assert!(ping.manifest_entry().is_none());

        let padding = PlannedFrame::Padding { len: 3 };
        assert!(!padding.is_ack_eliciting());

        let stream = PlannedFrame::Stream {
            id: StreamId::from_varint(VarInt::from_u8(4)),
            offset: 10,
            data: Bytes::from_static(b"abc"),
            fin: true,
        };
        assert!(matches!(
            stream.manifest_entry(),
            Some(SentFrame::Stream { range, .. }) if range.len == 3 && range.fin
        ));
    }
}
