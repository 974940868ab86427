// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end connection tests against a scripted TLS engine and null
//! cryptography. The "server" side is synthesized packet by packet with
//! the same codecs, keyed from the deterministic secrets the script
//! installs.

use super::*;
use crate::transmission::build_packet;
use vesper_quic_core::{
    crypto::{
        key_schedule::expand_level_keys,
        testing::NullProvider,
        tls::{testing::ScriptedSession, Output, Secrets},
        CipherSuite, Secret,
    },
    event::Event,
    packet::version::{QUIC_V1, QUIC_V2},
    random::testing::DeterministicGenerator,
    time::Duration,
};

type TestConnection =
    Connection<NullProvider, ScriptedSession, DeterministicGenerator, event::testing::Collector>;

fn at(millis: u64) -> Timestamp {
    Timestamp::from_duration(Duration::from_millis(millis))
}

fn addresses() -> AddressPair {
    AddressPair::new(
        "10.0.0.1:4433".parse().unwrap(),
        "192.0.2.1:443".parse().unwrap(),
    )
}

fn handshake_secrets() -> Secrets {
    Secrets {
        suite: CipherSuite::Aes128GcmSha256,
        client: Secret::new(alloc::vec![1; 32]),
        server: Secret::new(alloc::vec![2; 32]),
    }
}

fn one_rtt_secrets() -> Secrets {
    Secrets {
        suite: CipherSuite::Aes128GcmSha256,
        client: Secret::new(alloc::vec![3; 32]),
        server: Secret::new(alloc::vec![4; 32]),
    }
}

fn peer_parameters() -> TransportParameters {
    TransportParameters {
        initial_max_data: VarInt::from_u32(1 << 20),
        initial_max_stream_data_bidi_local: VarInt::from_u32(1 << 16),
        initial_max_stream_data_bidi_remote: VarInt::from_u32(1 << 16),
        initial_max_stream_data_uni: VarInt::from_u32(1 << 16),
        initial_max_streams_bidi: VarInt::from_u8(16),
        initial_max_streams_uni: VarInt::from_u8(16),
        max_datagram_frame_size: VarInt::from_u32(65535),
        ..TransportParameters::default()
    }
}

/// The standard client script: hello, then handshake keys on the server
/// flight, then 1-RTT keys + completion on the second feeding
fn client_script() -> ScriptedSession {
    ScriptedSession::new([
        Output {
            crypto_data: alloc::vec![(Level::Initial, b"client hello".to_vec())],
            ..Output::default()
        },
        Output {
            secrets: alloc::vec![(Level::Handshake, handshake_secrets())],
            ..Output::default()
        },
        Output {
            crypto_data: alloc::vec![(Level::Handshake, b"client finished".to_vec())],
            secrets: alloc::vec![(Level::OneRtt, one_rtt_secrets())],
            handshake_complete: true,
            transport_parameters: Some(peer_parameters().encode_to_vec()),
            alpn: Some(b"h3".to_vec()),
            ..Output::default()
        },
    ])
}

fn connect(script: ScriptedSession) -> TestConnection {
    let config = Config {
        provider: NullProvider,
        tls: script,
        random: DeterministicGenerator::new(42),
        subscriber: event::testing::Collector::default(),
        limits: Limits::default(),
        version: QUIC_V1,
        address_validation_token: None,
    };
    Connection::connect(config, addresses(), at(0)).unwrap()
}

fn server_cid() -> ConnectionId {
    ConnectionId::try_from(&[0xaa, 0x01, 0x02, 0x03][..]).unwrap()
}

/// Builds a server Initial packet keyed off the connection's DCID
fn server_initial(conn: &TestConnection, pn: u64, frames: &[PlannedFrame]) -> Vec<u8> {
    let secrets = derive_initial_secrets(&NullProvider, conn.version, conn.original_dcid.as_bytes());
    let keys = KeySet::<NullProvider>::new(
        &NullProvider,
        INITIAL_SUITE,
        endpoint::Type::Server,
        &secrets.client,
        &secrets.server,
    );
    let header = HeaderPlan::Long {
        packet_type: PacketType::Initial,
        version: conn.version,
        destination_cid: conn.source_cid,
        source_cid: server_cid(),
        token: Bytes::new(),
    };
    seal(&header, pn, frames, &keys)
}

/// Builds a server Handshake packet from the scripted handshake secrets
fn server_handshake(conn: &TestConnection, pn: u64, frames: &[PlannedFrame]) -> Vec<u8> {
    let keys = KeySet::<NullProvider>::new(
        &NullProvider,
        CipherSuite::Aes128GcmSha256,
        endpoint::Type::Server,
        &handshake_secrets().client,
        &handshake_secrets().server,
    );
    let header = HeaderPlan::Long {
        packet_type: PacketType::Handshake,
        version: conn.version,
        destination_cid: conn.source_cid,
        source_cid: server_cid(),
        token: Bytes::new(),
    };
    seal(&header, pn, frames, &keys)
}

/// Builds a server 1-RTT packet from the scripted application secrets
fn server_one_rtt(conn: &TestConnection, pn: u64, frames: &[PlannedFrame]) -> Vec<u8> {
    let sealer = expand_level_keys::<NullProvider>(
        &NullProvider,
        CipherSuite::Aes128GcmSha256,
        &one_rtt_secrets().server,
    );
    let header = HeaderPlan::Short {
        destination_cid: conn.source_cid,
        key_phase: packet::KeyPhase::Zero,
    };
    let mut buffer = alloc::vec![0u8; 1500];
    let len = build_packet(
        &mut buffer,
        &header,
        PacketNumberSpace::ApplicationData.new_packet_number(VarInt::new(pn).unwrap()),
        None,
        frames,
        &sealer.key,
        &sealer.header_key,
    )
    .unwrap();
    buffer.truncate(len);
    buffer
}

fn seal(
    header: &HeaderPlan,
    pn: u64,
    frames: &[PlannedFrame],
    keys: &KeySet<NullProvider>,
) -> Vec<u8> {
    let space = header.space();
    let mut buffer = alloc::vec![0u8; 1500];
    let len = build_packet(
        &mut buffer,
        header,
        space.new_packet_number(VarInt::new(pn).unwrap()),
        None,
        frames,
        &keys.sealer.key,
        &keys.sealer.header_key,
    )
    .unwrap();
    buffer.truncate(len);
    buffer
}

fn deliver(conn: &mut TestConnection, mut datagram: Vec<u8>, now: Timestamp) {
    conn.on_datagram(
        &mut datagram,
        addresses(),
        ExplicitCongestionNotification::NotEct,
        now,
    );
}

fn crypto_frame(data: &'static [u8]) -> PlannedFrame {
    PlannedFrame::Crypto {
        offset: VarInt::ZERO,
        data: Bytes::from_static(data),
    }
}

/// Drives the scripted handshake to the Connected state
fn established() -> TestConnection {
    let mut conn = connect(client_script());

    // client Initial flight goes out first
    let mut buffer = [0u8; 1500];
    let (len, _) = conn.transmit(&mut buffer, at(1)).expect("initial flight");
    assert!(len >= 1200, "client Initial datagram must be padded: {len}");

    // server Initial carries its hello; handshake keys install
    let datagram = server_initial(&conn, 0, &[crypto_frame(b"server hello")]);
    deliver(&mut conn, datagram, at(30));
    assert!(conn.handshake_keys.is_some());
    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
    //# a client MUST discard Initial keys when it first sends a Handshake
    //# packet
    assert!(conn.initial_keys.is_none());

    // server Handshake flight completes the TLS exchange
    let datagram = server_handshake(&conn, 0, &[crypto_frame(b"ee cert finished")]);
    deliver(&mut conn, datagram, at(35));
    assert!(conn.one_rtt_keys.is_some());
    assert!(conn.handshake_complete);

    // client answers with its Handshake finished flight
    let (_, _) = conn.transmit(&mut buffer, at(36)).expect("finished flight");

    // HANDSHAKE_DONE confirms and moves the connection to Connected
    let datagram = server_one_rtt(&mut conn, 0, &[PlannedFrame::Ping]);
    deliver(&mut conn, datagram, at(40));
    let datagram = server_one_rtt(
        &mut conn,
        1,
        &[PlannedFrame::MaxData {
            limit: VarInt::from_u32(1 << 21),
        }],
    );
    deliver(&mut conn, datagram, at(41));
    conn.on_handshake_done(at(42));

    conn
}

#[test]
fn handshake_reaches_connected() {
    let mut conn = connect(client_script());
    let mut buffer = [0u8; 1500];
    conn.transmit(&mut buffer, at(1)).expect("initial flight");

    let pkt = server_initial(&conn, 0, &[crypto_frame(b"server hello")]);
    deliver(&mut conn, pkt, at(30));
    let pkt = server_handshake(&conn, 0, &[crypto_frame(b"ee cert finished")]);
    deliver(&mut conn, pkt, at(35));
    assert_eq!(*conn.state(), State::Handshaking);
    assert!(conn.alpn().is_some());

    // the TLS engine saw the handshake bytes in offset order
    assert_eq!(
        conn.tls.fed,
        alloc::vec![
            (Level::Initial, b"server hello".to_vec()),
            (Level::Handshake, b"ee cert finished".to_vec()),
        ]
    );

    let mut buffer = [0u8; 1500];
    conn.transmit(&mut buffer, at(36)).expect("finished flight");

    // HANDSHAKE_DONE arrives in 1-RTT
    let done = server_one_rtt(&mut conn, 0, &[PlannedFrame::Ping]);
    deliver(&mut conn, done, at(40));
    let done = server_one_rtt(&mut conn, 1, &[PlannedFrame::Ping]);
    deliver(&mut conn, done, at(41));

    // synthesize HANDSHAKE_DONE via dispatch, exercising confirmation
    conn.on_handshake_done(at(42));
    assert_eq!(*conn.state(), State::Connected);
    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
    //# An endpoint MUST discard its Handshake keys when the TLS handshake
    //# is confirmed
    assert!(conn.handshake_keys.is_none());

    let mut saw_established = false;
    let mut saw_confirmed = false;
    while let Some(event) = conn.poll_event() {
        match event {
            Event::ConnectionEstablished { negotiated_version } => {
                assert_eq!(negotiated_version, QUIC_V1);
                saw_established = true;
            }
            Event::HandshakeConfirmed => saw_confirmed = true,
            _ => {}
        }
    }
    assert!(saw_established && saw_confirmed);
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
//# When the client receives a Version Negotiation packet, it first
//# checks ... then selects an acceptable protocol version from the
//# list provided by the server.
#[test]
fn version_negotiation_switches_to_v2() {
    let mut conn = connect(client_script());
    let mut buffer = [0u8; 1500];
    conn.transmit(&mut buffer, at(1)).expect("initial flight");

    // server only speaks v2
    let mut vn = Vec::new();
    vn.push(0x80u8 | 0x0a);
    vn.extend_from_slice(&0u32.to_be_bytes());
    vn.push(conn.source_cid.len() as u8);
    vn.extend_from_slice(conn.source_cid.as_bytes());
    vn.push(4);
    vn.extend_from_slice(server_cid().as_bytes());
    vn.extend_from_slice(&QUIC_V2.to_be_bytes());

    deliver(&mut conn, vn, at(5));
    assert_eq!(conn.version, QUIC_V2);
    assert!(conn.state().is_open());

    // the retried Initial goes out under version 2
    let mut buffer = [0u8; 1500];
    let (len, _) = conn.transmit(&mut buffer, at(6)).expect("retried flight");
    let (packet, _) = decoding::parse(&mut buffer[..len], connection::id::LOCAL_LEN).unwrap();
    match packet {
        decoding::Packet::Protected(packet) => {
            assert_eq!(packet.version, Some(QUIC_V2));
            assert_eq!(packet.packet_type, Some(PacketType::Initial));
        }
        _ => panic!("expected a protected packet"),
    }

    // the handshake completes on the new version
    let pkt = server_initial(&conn, 0, &[crypto_frame(b"server hello")]);
    deliver(&mut conn, pkt, at(30));
    assert!(conn.handshake_keys.is_some());
}

#[test]
fn stream_round_trip_after_establishment() {
    let mut conn = established();
    conn.on_handshake_done(at(42));

    let id = conn.open_stream(StreamType::Bidirectional).unwrap();
    conn.stream_write(id, Bytes::from_static(b"request body"), true)
        .unwrap();

    let mut buffer = [0u8; 1500];
    let (len, _) = conn.transmit(&mut buffer, at(50)).expect("stream packet");
    assert!(len > 0);

    // server sends a response on its half of the stream
    let response = server_one_rtt(
        &mut conn,
        2,
        &[PlannedFrame::Stream {
            id,
            offset: 0,
            data: Bytes::from_static(b"response"),
            fin: true,
        }],
    );
    deliver(&mut conn, response, at(60));

    match conn.stream_read(id, 1024).unwrap() {
        ReadOutcome::Data { data, fin } => {
            assert_eq!(data.as_slice(), b"response");
            assert!(fin);
        }
        other => panic!("unexpected read outcome: {other:?}"),
    }
}

#[test]
fn datagram_round_trip() {
    let mut conn = established();

    conn.send_datagram(Bytes::from_static(b"unreliable ping"))
        .unwrap();
    let mut buffer = [0u8; 1500];
    let (len, _) = conn.transmit(&mut buffer, at(50)).expect("datagram packet");
    assert!(len > 0);

    let incoming = server_one_rtt(
        &mut conn,
        2,
        &[PlannedFrame::Datagram {
            data: Bytes::from_static(b"unreliable pong"),
        }],
    );
    deliver(&mut conn, incoming, at(60));
    assert_eq!(conn.recv_datagram().unwrap().as_ref(), b"unreliable pong");
    assert!(conn.recv_datagram().is_none());
}

#[test]
fn local_close_emits_connection_close_then_drains() {
    let mut conn = established();
    conn.close(application::Error::from(7u32), at(100));
    assert!(matches!(conn.state(), State::Closing { .. }));

    let mut buffer = [0u8; 1500];
    let (len, _) = conn.transmit(&mut buffer, at(101)).expect("close packet");
    assert!(len > 0);
    // only one close per received packet
    assert!(conn.transmit(&mut buffer, at(102)).is_none());

    // after 3 PTO the connection reaches Closed
    conn.on_timeout(at(100_000));
    assert!(conn.state().is_closed());
}

#[test]
fn peer_close_enters_draining() {
    let mut conn = established();
    let close = server_one_rtt(
        &mut conn,
        2,
        &[PlannedFrame::ApplicationClose {
            error: application::Error::from(3u32),
            reason: Bytes::from_static(b"done"),
        }],
    );
    deliver(&mut conn, close, at(100));
    assert!(matches!(conn.state(), State::Draining { .. }));

    // draining connections stay silent
    let mut buffer = [0u8; 1500];
    assert!(conn.transmit(&mut buffer, at(101)).is_none());

    conn.on_timeout(at(100_000));
    assert!(conn.state().is_closed());
}

#[test]
fn idle_timeout_closes_silently() {
    let mut conn = established();
    conn.on_timeout(at(31_000));
    assert!(conn.state().is_closed());

    let mut saw_closed = false;
    while let Some(event) = conn.poll_event() {
        if let Event::ConnectionClosed { error } = event {
            assert_eq!(error, connection::Error::IdleTimeout);
            saw_closed = true;
        }
    }
    assert!(saw_closed);
}

#[test]
fn duplicate_packets_are_dropped() {
    let mut conn = established();
    let packet = server_one_rtt(&mut conn, 9, &[PlannedFrame::Ping]);

    deliver(&mut conn, packet.clone(), at(50));
    let received = conn.stats().packets_received;
    deliver(&mut conn, packet, at(51));
    assert_eq!(conn.stats().packets_received, received);
}

#[test]
fn wrong_level_frame_closes_connection() {
    let mut conn = connect(client_script());
    let mut buffer = [0u8; 1500];
    conn.transmit(&mut buffer, at(1)).expect("initial flight");

    // a STREAM frame is not allowed in an Initial packet
    let bad = server_initial(
        &conn,
        0,
        &[PlannedFrame::Stream {
            id: StreamId::from_varint(VarInt::from_u8(1)),
            offset: 0,
            data: Bytes::from_static(b"nope"),
            fin: false,
        }],
    );
    deliver(&mut conn, bad, at(30));
    assert!(matches!(conn.state(), State::Closing { .. }));
}
