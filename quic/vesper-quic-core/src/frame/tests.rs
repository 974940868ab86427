// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{connection::ConnectionId, interval_set::IntervalSet, stateless_reset, stream::StreamType};
use vesper_codec::EncoderBuffer;

fn round_trip(frame: &Frame) {
    let mut storage = [0u8; 512];
    let len = {
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(frame);
        encoder.len()
    };
    assert_eq!(len, frame.encoding_size());

    let (decoded, buffer) = Frame::decode(DecoderBuffer::new(&storage[..len])).unwrap();
    assert!(buffer.is_empty());
    assert_eq!(&decoded.expect("skipped known frame"), frame);
}

#[test]
fn all_frame_types_round_trip() {
    let ack_set: IntervalSet = [1..=3, 7..=9].into_iter().collect();

    let frames = [
        Frame::Padding(Padding { length: 7 }),
        Frame::Ping(Ping),
        Frame::Ack(Ack::from_interval_set(&ack_set, VarInt::from_u8(5), 8, None).unwrap()),
        Frame::ResetStream(ResetStream {
            stream_id: VarInt::from_u8(4),
            application_error_code: VarInt::from_u8(17),
            final_size: VarInt::from_u32(10_000),
        }),
        Frame::StopSending(StopSending {
            stream_id: VarInt::from_u8(4),
            application_error_code: VarInt::from_u8(3),
        }),
        Frame::Crypto(Crypto {
            offset: VarInt::from_u32(1200),
            data: b"client hello bytes",
        }),
        Frame::NewToken(NewToken { token: b"token" }),
        Frame::Stream(Stream {
            stream_id: VarInt::from_u8(8),
            offset: VarInt::from_u32(300),
            is_fin: true,
            is_last_frame: false,
            data: b"stream payload",
        }),
        Frame::MaxData(MaxData {
            maximum_data: VarInt::from_u32(1 << 20),
        }),
        Frame::MaxStreamData(MaxStreamData {
            stream_id: VarInt::from_u8(8),
            maximum_stream_data: VarInt::from_u32(1 << 16),
        }),
        Frame::MaxStreams(MaxStreams {
            stream_type: StreamType::Unidirectional,
            maximum_streams: VarInt::from_u8(32),
        }),
        Frame::DataBlocked(DataBlocked {
            data_limit: VarInt::from_u32(1 << 20),
        }),
        Frame::StreamDataBlocked(StreamDataBlocked {
            stream_id: VarInt::from_u8(8),
            stream_data_limit: VarInt::from_u32(1 << 16),
        }),
        Frame::StreamsBlocked(StreamsBlocked {
            stream_type: StreamType::Bidirectional,
            stream_limit: VarInt::from_u8(100),
        }),
        Frame::NewConnectionId(NewConnectionId {
            sequence_number: VarInt::from_u8(3),
            retire_prior_to: VarInt::from_u8(1),
            connection_id: ConnectionId::try_from(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]).unwrap(),
            stateless_reset_token: stateless_reset::Token::new([9; 16]),
        }),
        Frame::RetireConnectionId(RetireConnectionId {
            sequence_number: VarInt::from_u8(2),
        }),
        Frame::PathChallenge(PathChallenge {
            data: [0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xfe, 0xed],
        }),
        Frame::PathResponse(PathResponse {
            data: [0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xfe, 0xed],
        }),
        Frame::ConnectionClose(ConnectionClose {
            error_code: VarInt::from_u8(0x0a),
            frame_type: Some(VarInt::from_u8(0x06)),
            reason: b"proto violation",
        }),
        Frame::ConnectionClose(ConnectionClose {
            error_code: VarInt::from_u8(99),
            frame_type: None,
            reason: b"app close",
        }),
        Frame::HandshakeDone(HandshakeDone),
        Frame::Datagram(Datagram {
            is_last_frame: false,
            data: b"unreliable",
        }),
    ];

    for frame in &frames {
        round_trip(frame);
    }
}

#[test]
fn elicitation_classes() {
    assert!(!Frame::Padding(Padding { length: 1 })
        .ack_elicitation()
        .is_ack_eliciting());
    assert!(!Frame::ConnectionClose(ConnectionClose {
        error_code: VarInt::ZERO,
        frame_type: None,
        reason: b"",
    })
    .ack_elicitation()
    .is_ack_eliciting());
    assert!(Frame::Ping(Ping).ack_elicitation().is_ack_eliciting());
    assert!(Frame::HandshakeDone(HandshakeDone)
        .ack_elicitation()
        .is_ack_eliciting());
}

#[test]
fn probing_classes() {
    assert!(Frame::PathChallenge(PathChallenge { data: [0; 8] }).is_probing());
    assert!(Frame::Padding(Padding { length: 1 }).is_probing());
    assert!(!Frame::Ping(Ping).is_probing());
    assert!(!Frame::Stream(Stream {
        stream_id: VarInt::ZERO,
        offset: VarInt::ZERO,
        is_fin: false,
        is_last_frame: true,
        data: b"x",
    })
    .is_probing());
}

#[test]
fn unknown_frame_type_fails() {
    // 0x21 is neither assigned nor of the grease form
    let bytes = [0x21, 0x00];
    assert!(Frame::decode(DecoderBuffer::new(&bytes)).is_err());
}

#[test]
fn grease_frame_types_are_skipped() {
    // 27 + 31·n is reserved for greasing; n = 0 collides with an assigned
    // type, so the first values seen in practice are 58 and 89
    for tag in [58u8, 89] {
        let mut storage = [0u8; 16];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(&VarInt::from_u8(tag));
            encoder.encode(&Ping);
            encoder.len()
        };

        let mut iter = FrameIter::new(&storage[..len]);
        let frame = iter.next().unwrap().unwrap();
        assert_eq!(frame, Frame::Ping(Ping));
        assert!(iter.next().is_none());
    }
}

#[test]
fn padding_run_coalesces() {
    let bytes = [0u8; 24];
    let mut iter = FrameIter::new(&bytes);
    let frame = iter.next().unwrap().unwrap();
    assert_eq!(frame, Frame::Padding(Padding { length: 24 }));
    assert!(iter.next().is_none());
}

#[test]
fn stream_without_len_extends_to_end() {
    let frame = Frame::Stream(Stream {
        stream_id: VarInt::from_u8(4),
        offset: VarInt::ZERO,
        is_fin: false,
        is_last_frame: true,
        data: b"tail data",
    });
    round_trip(&frame);
}

#[test]
fn malformed_frame_stops_iteration() {
    // CRYPTO frame with a length pointing past the end of the buffer
    let bytes = [0x06, 0x00, 0x14, 0xaa];
    let mut iter = FrameIter::new(&bytes);
    assert!(iter.next().unwrap().is_err());
    assert!(iter.next().is_none());
}
