// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The client connection: handshake orchestration, frame dispatch,
//! transmission, and the close/draining lifecycle.

#[cfg(test)]
mod tests;

use crate::{
    path,
    space::PacketSpace,
    stream::{manager::ControlFrame, ReadOutcome, StreamManager},
    transmission::{self, HeaderPlan, Manifest, PlannedFrame, SentFrame},
};
use alloc::{collections::VecDeque, vec::Vec};
use bytes::Bytes;
use vesper_quic_core::{
    ack, application,
    connection::{self, limits::Limits, ConnectionId},
    crypto::{
        initial::{derive_initial_secrets, INITIAL_SUITE},
        key_schedule::KeySet,
        packet_protection,
        tls::{self, Level},
        OneRttKeys, Provider,
    },
    datagram::{RecvQueue, SendQueue},
    endpoint, event,
    frame::{self, Frame},
    inet::{AddressPair, ExplicitCongestionNotification},
    packet::{
        self, decoding,
        long::PacketType,
        number::{PacketNumber, PacketNumberSpace},
        Version,
    },
    path::Id as PathId,
    random,
    recovery::CongestionController,
    stream::{StreamId, StreamType},
    time::{earliest, Timer, Timestamp},
    transport::{self, parameters::TransportParameters},
    varint::VarInt,
};

/// The connection lifecycle.
//= https://www.rfc-editor.org/rfc/rfc9000#section-10
//# An established QUIC connection can be terminated in one of three
//# ways: idle timeout (Section 10.1), immediate close (Section 10.2),
//# or stateless reset (Section 10.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    Handshaking,
    Connected,
    /// A local close was initiated; we emit CONNECTION_CLOSE and wait
    Closing {
        error: connection::Error,
        /// One close frame owed per received packet
        respond: bool,
    },
    /// The peer closed; we only wait out the drain period
    Draining {
        error: connection::Error,
    },
    Closed {
        error: connection::Error,
    },
}

impl State {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Handshaking | Self::Connected)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Point-in-time connection statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub smoothed_rtt: core::time::Duration,
    pub min_rtt: core::time::Duration,
    pub congestion_window: u32,
    pub bytes_in_flight: u32,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub datagrams_dropped: u64,
    pub path_count: usize,
    pub key_phase: u8,
    pub handshake_confirmed: bool,
}

/// Everything needed to construct a connection
pub struct Config<P: Provider, T: tls::Session, R: random::Generator, S: event::Subscriber> {
    pub provider: P,
    pub tls: T,
    pub random: R,
    pub subscriber: S,
    pub limits: Limits,
    pub version: Version,
    pub address_validation_token: Option<Bytes>,
}

pub struct Connection<P: Provider, T: tls::Session, R: random::Generator, S: event::Subscriber> {
    provider: P,
    tls: T,
    random: R,
    subscriber: S,
    limits: Limits,

    state: State,
    version: Version,
    local: endpoint::Type,

    /// The DCID chosen for the first flight, which keys Initial secrets
    original_dcid: ConnectionId,
    source_cid: ConnectionId,

    initial_keys: Option<KeySet<P>>,
    handshake_keys: Option<KeySet<P>>,
    one_rtt_keys: Option<OneRttKeys<P>>,

    initial_space: PacketSpace,
    handshake_space: PacketSpace,
    /// Application spaces, one per path under multipath, else just [0]
    app_spaces: Vec<PacketSpace>,

    pub(crate) paths: path::Manager,
    pub(crate) streams: StreamManager,
    datagram_tx: SendQueue,
    datagram_rx: RecvQueue,

    peer_params: Option<TransportParameters>,
    handshake_complete: bool,
    handshake_confirmed: bool,

    /// Token presented in Initial packets (from a prior NEW_TOKEN)
    address_validation_token: Bytes,
    /// Tokens/tickets received on this connection, for the caches
    pub(crate) received_tokens: Vec<Bytes>,
    pub(crate) received_tickets: Vec<Bytes>,

    idle_timer: Timer,
    /// Ends the Closing/Draining period
    close_timer: Timer,
    keep_alive_timer: Timer,

    events: VecDeque<event::Event>,
    alpn: Option<Bytes>,
    established_reported: bool,
    keep_alive_ping_owed: bool,

    stats_packets_sent: u64,
    stats_packets_received: u64,
    stats_packets_lost: u64,
}

impl<P: Provider, T: tls::Session, R: random::Generator, S: event::Subscriber>
    Connection<P, T, R, S>
{
    /// Builds the connection and the first CRYPTO flight.
    ///
    /// The caller supplies the resolved remote address; the socket seam
    /// provides the local one.
    pub fn connect(
        mut config: Config<P, T, R, S>,
        addresses: AddressPair,
        now: Timestamp,
    ) -> Result<Self, connection::Error> {
        let original_dcid = ConnectionId::generate(&mut config.random);
        let source_cid = ConnectionId::generate(&mut config.random);

        let secrets = derive_initial_secrets(&config.provider, config.version, original_dcid.as_bytes());
        let initial_keys = KeySet::new(
            &config.provider,
            INITIAL_SUITE,
            endpoint::Type::Client,
            &secrets.client,
            &secrets.server,
        );

        let ack_settings = ack::Settings {
            max_ack_delay: config.limits.max_ack_delay(),
            ack_delay_exponent: config.limits.ack_delay_exponent(),
            ..ack::Settings::default()
        };

        let mut connection = Self {
            paths: path::Manager::new(addresses, original_dcid, config.limits.congestion_algorithm()),
            streams: StreamManager::new(endpoint::Type::Client, &config.limits),
            datagram_tx: SendQueue::new(config.limits.datagram_send_queue_len()),
            datagram_rx: RecvQueue::new(config.limits.datagram_recv_queue_len()),
            provider: config.provider,
            tls: config.tls,
            random: config.random,
            subscriber: config.subscriber,
            limits: config.limits,
            state: State::Handshaking,
            version: config.version,
            local: endpoint::Type::Client,
            original_dcid,
            source_cid,
            initial_keys: Some(initial_keys),
            handshake_keys: None,
            one_rtt_keys: None,
            initial_space: PacketSpace::new(PacketNumberSpace::Initial, ack_settings),
            handshake_space: PacketSpace::new(PacketNumberSpace::Handshake, ack_settings),
            app_spaces: alloc::vec![PacketSpace::new(
                PacketNumberSpace::ApplicationData,
                ack_settings
            )],
            peer_params: None,
            handshake_complete: false,
            handshake_confirmed: false,
            address_validation_token: config.address_validation_token.unwrap_or_default(),
            received_tokens: Vec::new(),
            received_tickets: Vec::new(),
            idle_timer: Timer::default(),
            close_timer: Timer::default(),
            keep_alive_timer: Timer::default(),
            events: VecDeque::new(),
            alpn: None,
            established_reported: false,
            keep_alive_ping_owed: false,
            stats_packets_sent: 0,
            stats_packets_received: 0,
            stats_packets_lost: 0,
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7
        //# The cryptographic handshake is carried in Initial and Handshake
        //# packets.
        let local_params =
            TransportParameters::from_limits(&connection.limits, connection.source_cid)
                .encode_to_vec();
        let output = connection
            .tls
            .start(&local_params)
            .map_err(|error| connection.close_with_transport_error(error, now))?;
        connection.on_tls_output(output, now)?;

        connection.arm_idle_timer(now);
        Ok(connection)
    }

    #[inline]
    pub fn state(&self) -> &State {
        &self.state
    }

    #[inline]
    pub fn alpn(&self) -> Option<&Bytes> {
        self.alpn.as_ref()
    }

    /// Drains application-facing events
    pub fn poll_event(&mut self) -> Option<event::Event> {
        self.events.pop_front()
    }

    fn publish(&mut self, event: event::Event) {
        self.subscriber.on_event(&event);
        self.events.push_back(event);
    }

    // === timers ===================================================

    fn idle_timeout(&self) -> core::time::Duration {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# Each endpoint advertises a max_idle_timeout, but the effective
        //# value at an endpoint is computed as the minimum of the two
        //# advertised values
        let local = self.limits.max_idle_timeout();
        match self.peer_params.as_ref().and_then(|p| p.max_idle_timeout()) {
            Some(peer) => local.min(peer),
            None => local,
        }
    }

    fn arm_idle_timer(&mut self, now: Timestamp) {
        self.idle_timer.set(now + self.idle_timeout());
        if let Some(period) = self.limits.keep_alive_period() {
            self.keep_alive_timer.set(now + period);
        }
    }

    fn pto_duration(&self) -> core::time::Duration {
        self.paths
            .get(self.paths.active_id())
            .map(|path| {
                path.rtt_estimator
                    .pto_period(1, PacketNumberSpace::ApplicationData)
            })
            .unwrap_or(core::time::Duration::from_millis(999))
    }

    pub fn next_expiration(&self) -> Option<Timestamp> {
        if self.state.is_closed() {
            return None;
        }
        if matches!(self.state, State::Closing { .. } | State::Draining { .. }) {
            return self.close_timer.next_expiration();
        }
        earliest(
            [
                self.initial_space.next_expiration(),
                self.handshake_space.next_expiration(),
                self.idle_timer.next_expiration(),
                self.keep_alive_timer.next_expiration(),
                self.paths.next_expiration(),
                self.one_rtt_keys.as_ref().and_then(OneRttKeys::next_expiration),
            ]
            .into_iter()
            .chain(self.app_spaces.iter().map(PacketSpace::next_expiration)),
        )
    }

    pub fn on_timeout(&mut self, now: Timestamp) {
        match &self.state {
            State::Closed { .. } => return,
            State::Closing { error, .. } | State::Draining { error } => {
                if self.close_timer.poll_expiration(now).is_ready() {
                    let error = error.clone();
                    self.enter_closed(error);
                }
                return;
            }
            _ => {}
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# If a max_idle_timeout is specified by either endpoint ... the
        //# connection is silently closed and its state is discarded when it
        //# remains idle
        if self.idle_timer.poll_expiration(now).is_ready() {
            self.enter_closed(connection::Error::IdleTimeout);
            return;
        }

        if self.keep_alive_timer.poll_expiration(now).is_ready() {
            self.keep_alive_ping_owed = true;
            if let Some(period) = self.limits.keep_alive_period() {
                self.keep_alive_timer.set(now + period);
            }
        }

        if let Some(keys) = self.one_rtt_keys.as_mut() {
            keys.on_timeout(now);
        }
        self.paths.on_timeout(now);

        let mut lost_batches: Vec<(PathId, Vec<(u64, Manifest)>)> = Vec::new();

        for space_ref in [SpaceRef::Initial, SpaceRef::Handshake] {
            let path_id = self.paths.active_id();
            let lost = {
                let Some(path) = self.paths.get_mut(path_id) else { continue };
                let space = match space_ref {
                    SpaceRef::Initial => &mut self.initial_space,
                    SpaceRef::Handshake => &mut self.handshake_space,
                    SpaceRef::App(_) => unreachable!(),
                };
                space.on_timeout(path, now)
            };
            lost_batches.push((
                path_id,
                lost.into_iter().map(|(pn, info)| (pn, info.data)).collect(),
            ));
        }

        for index in 0..self.app_spaces.len() {
            let path_id = self.app_space_path(index);
            let lost = {
                let Some(path) = self.paths.get_mut(path_id) else { continue };
                self.app_spaces[index].on_timeout(path, now)
            };
            lost_batches.push((
                path_id,
                lost.into_iter().map(|(pn, info)| (pn, info.data)).collect(),
            ));
        }

        for (_, batch) in lost_batches {
            for (_, manifest) in batch {
                self.stats_packets_lost += 1;
                self.on_manifest_lost(manifest);
            }
        }
    }

    /// The path an application space index maps to
    fn app_space_path(&self, index: usize) -> PathId {
        if self.paths.is_multipath_active() {
            PathId::new(index as u8)
        } else {
            self.paths.active_id()
        }
    }

    fn app_space_index(&self, path_id: PathId) -> usize {
        if self.paths.is_multipath_active() {
            (path_id.as_u8() as usize).min(self.app_spaces.len() - 1)
        } else {
            0
        }
    }

    /// Grows the application space table alongside the path table
    fn ensure_app_space(&mut self, path_id: PathId) {
        let ack_settings = ack::Settings {
            max_ack_delay: self.limits.max_ack_delay(),
            ack_delay_exponent: self.limits.ack_delay_exponent(),
            ..ack::Settings::default()
        };
        while self.app_spaces.len() <= path_id.as_u8() as usize {
            self.app_spaces.push(PacketSpace::new(
                PacketNumberSpace::ApplicationData,
                ack_settings,
            ));
        }
    }

    // === close ====================================================

    fn close_with_transport_error(
        &mut self,
        error: transport::Error,
        now: Timestamp,
    ) -> connection::Error {
        let error = connection::Error::Transport(error);
        self.enter_closing(error.clone(), now);
        error
    }

    /// Application-initiated close
    pub fn close(&mut self, error: application::Error, now: Timestamp) {
        if !self.state.is_open() {
            return;
        }
        let error = connection::Error::Application {
            error,
            initiator: endpoint::Type::Client,
        };
        self.enter_closing(error, now);
    }

    fn enter_closing(&mut self, error: connection::Error, now: Timestamp) {
        if !self.state.is_open() {
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.1
        //# An endpoint that wishes to communicate a fatal connection error
        //# MUST use a CONNECTION_CLOSE frame if it is able.
        self.state = State::Closing {
            error,
            respond: true,
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
        //# The closing and draining connection states exist to ensure that
        //# connections close cleanly ... for at least three times the
        //# current PTO interval
        self.close_timer.set(now + 3 * self.pto_duration());
    }

    fn enter_draining(&mut self, error: connection::Error, now: Timestamp) {
        self.state = State::Draining { error };
        self.close_timer.set(now + 3 * self.pto_duration());
    }

    fn enter_closed(&mut self, error: connection::Error) {
        self.publish(event::Event::ConnectionClosed {
            error: error.clone(),
        });
        self.state = State::Closed { error };
    }

    /// Observes a possible stateless reset in an undecryptable datagram
    fn check_stateless_reset(&mut self, datagram: &[u8]) -> bool {
        let matched = self
            .paths
            .reset_tokens()
            .any(|token| token.matches_suffix(datagram));
        if matched {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-10.3.1
            //# An endpoint detects a potential stateless reset using the
            //# trailing 16 bytes of the UDP datagram.
            self.enter_closed(connection::Error::StatelessReset);
        }
        matched
    }

    // === TLS plumbing =============================================

    fn on_tls_output(&mut self, output: tls::Output, now: Timestamp) -> Result<(), connection::Error> {
        for (level, data) in &output.crypto_data {
            let space = match level {
                Level::Initial => &mut self.initial_space,
                Level::Handshake => &mut self.handshake_space,
                Level::OneRtt => &mut self.app_spaces[0],
            };
            space.crypto_tx.push(data);
        }

        for (level, secrets) in &output.secrets {
            match level {
                Level::Initial => {}
                Level::Handshake => {
                    self.handshake_keys = Some(KeySet::new(
                        &self.provider,
                        secrets.suite,
                        self.local,
                        &secrets.client,
                        &secrets.server,
                    ));

                    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
                    //# a client MUST discard Initial keys when it first sends a
                    //# Handshake packet
                    self.discard_initial_space();
                }
                Level::OneRtt => {
                    self.one_rtt_keys = Some(OneRttKeys::new(
                        &self.provider,
                        secrets.suite,
                        self.local,
                        secrets.client.clone(),
                        secrets.server.clone(),
                    ));
                }
            }
        }

        if let Some(params) = &output.transport_parameters {
            let params = TransportParameters::decode(params)
                .map_err(|error| self.close_with_transport_error(error, now))?;
            self.apply_peer_parameters(params);
        }

        if let Some(alpn) = output.alpn {
            self.alpn = Some(alpn.into());
        }
        if let Some(ticket) = output.session_ticket {
            self.received_tickets.push(ticket.into());
        }

        if output.handshake_complete {
            self.handshake_complete = true;
        }
        if self.handshake_complete && self.one_rtt_keys.is_some() && !self.established_reported {
            self.established_reported = true;
            self.publish(event::Event::ConnectionEstablished {
                negotiated_version: self.version,
            });
        }

        Ok(())
    }

    fn apply_peer_parameters(&mut self, params: TransportParameters) {
        self.streams.on_transport_parameters(&params);
        self.datagram_tx
            .on_transport_parameters(params.max_datagram_frame_size.as_u64());
        self.paths.on_transport_parameters(
            params.disable_active_migration,
            params.active_connection_id_limit,
            params.stateless_reset_token,
            self.limits.multipath_enabled(),
        );
        if let Some(path) = self.paths.get_mut(self.paths.active_id()) {
            path.rtt_estimator.on_max_ack_delay(params.max_ack_delay());
        }
        self.peer_params = Some(params);
    }

    fn discard_initial_space(&mut self) {
        if self.initial_keys.take().is_some() {
            let path_id = self.paths.active_id();
            if let Some(path) = self.paths.get_mut(path_id) {
                self.initial_space.discard(path);
            }
        }
    }

    fn discard_handshake_space(&mut self) {
        if self.handshake_keys.take().is_some() {
            let path_id = self.paths.active_id();
            if let Some(path) = self.paths.get_mut(path_id) {
                self.handshake_space.discard(path);
            }
        }
    }

    // === receive path =============================================

    /// Processes one incoming UDP datagram
    pub fn on_datagram(
        &mut self,
        datagram: &mut [u8],
        addresses: AddressPair,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) {
        if self.state.is_closed() {
            return;
        }

        let datagram_len = datagram.len();
        let path_id = self.paths.on_datagram_received(&addresses, datagram_len);

        let mut remaining: &mut [u8] = &mut datagram[..];
        let mut processed_any = false;
        let mut recognized_any = false;

        while !remaining.is_empty() {
            let parsed = decoding::parse(remaining, connection::id::LOCAL_LEN);
            let (packet, rest) = match parsed {
                Ok(result) => result,
                Err(_) => break,
            };

            match packet {
                decoding::Packet::VersionNegotiation(vn) => {
                    self.on_version_negotiation(&vn, now);
                    recognized_any = true;
                }
                decoding::Packet::Retry { .. } => {
                    // Retry handling requires restarting the handshake with
                    // the server's token; surfaced via INVALID_TOKEN when
                    // unsupported by the application flow
                    recognized_any = true;
                }
                decoding::Packet::Protected(packet) => {
                    match self.on_protected_packet(packet, path_id, ecn, now) {
                        Ok(()) => {
                            processed_any = true;
                            recognized_any = true;
                        }
                        Err(PacketError::Drop) => {}
                        Err(PacketError::Close(error)) => {
                            let _ = self.close_with_transport_error(error, now);
                            return;
                        }
                    }
                }
            }
            remaining = rest;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.3.1
        //# the comparison MUST be performed when the first packet in an
        //# incoming datagram either cannot be associated with a connection,
        //# or cannot be decrypted
        if !recognized_any && self.check_stateless_reset(datagram) {
            return;
        }

        if processed_any {
            self.stats_packets_received += 1;
            self.arm_idle_timer(now);
        }

        // closing connections answer each datagram with one close frame
        if let State::Closing { respond, .. } = &mut self.state {
            *respond = true;
        }
    }

    fn on_version_negotiation(&mut self, vn: &packet::version_negotiation::VersionNegotiation, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
        //# An endpoint MUST ignore a Version Negotiation packet if it has
        //# already processed any packet from the server
        if self.stats_packets_received > 0 || !matches!(self.state, State::Handshaking) {
            return;
        }
        if vn.supported_versions.contains(&self.version) {
            return;
        }

        let Some(version) = vn.select(self.version) else {
            let _ = self.close_with_transport_error(
                transport::Error::PROTOCOL_VIOLATION.with_reason("no mutually supported version"),
                now,
            );
            return;
        };

        //= https://www.rfc-editor.org/rfc/rfc9369#section-3.3
        //# QUIC version 2 uses a different salt ... for Initial packets
        self.version = version;

        // release any first-flight bytes from the congestion controller
        let path_id = self.paths.active_id();
        if let Some(path) = self.paths.get_mut(path_id) {
            self.initial_space.discard(path);
        }
        let secrets =
            derive_initial_secrets(&self.provider, version, self.original_dcid.as_bytes());
        self.initial_keys = Some(KeySet::new(
            &self.provider,
            INITIAL_SUITE,
            self.local,
            &secrets.client,
            &secrets.server,
        ));
        // the Initial flight restarts from packet number zero on retry;
        // retransmit the whole CRYPTO stream
        let crypto = core::mem::take(&mut self.initial_space.crypto_tx);
        let ack_settings = ack::Settings {
            max_ack_delay: self.limits.max_ack_delay(),
            ack_delay_exponent: self.limits.ack_delay_exponent(),
            ..ack::Settings::default()
        };
        self.initial_space = PacketSpace::new(PacketNumberSpace::Initial, ack_settings);
        self.initial_space.crypto_tx = crypto;
        self.initial_space.crypto_tx.restart();
    }

    fn on_protected_packet(
        &mut self,
        packet: decoding::ProtectedPacket<'_>,
        path_id: PathId,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) -> Result<(), PacketError> {
        let space_kind = packet.space();

        // version sanity for long headers
        if let Some(version) = packet.version {
            if version != self.version {
                return Err(PacketError::Drop);
            }
        }

        let space_index = match space_kind {
            PacketNumberSpace::ApplicationData => self.app_space_index(path_id),
            _ => 0,
        };

        let largest_processed = match space_kind {
            PacketNumberSpace::Initial => self.initial_space.largest_processed,
            PacketNumberSpace::Handshake => self.handshake_space.largest_processed,
            PacketNumberSpace::ApplicationData => {
                self.app_spaces[space_index].largest_processed
            }
        };

        let pn_offset = packet.pn_offset;
        let is_long = packet.is_long_header();
        let peer_source_cid = packet.source_cid;
        let bytes = packet.into_bytes();

        // remove protection + decrypt with the space's keys
        let (packet_number, payload_range, key_update) = match space_kind {
            PacketNumberSpace::Initial => {
                let keys = self.initial_keys.as_ref().ok_or(PacketError::Drop)?;
                let (pn, range) = packet_protection::unprotect_and_decrypt(
                    keys.opener.header_key(),
                    &keys.opener.key,
                    space_kind,
                    largest_processed,
                    pn_offset,
                    bytes,
                )
                .map_err(|_| PacketError::Drop)?;
                (pn, range, false)
            }
            PacketNumberSpace::Handshake => {
                let keys = self.handshake_keys.as_ref().ok_or(PacketError::Drop)?;
                let (pn, range) = packet_protection::unprotect_and_decrypt(
                    keys.opener.header_key(),
                    &keys.opener.key,
                    space_kind,
                    largest_processed,
                    pn_offset,
                    bytes,
                )
                .map_err(|_| PacketError::Drop)?;
                (pn, range, false)
            }
            PacketNumberSpace::ApplicationData => {
                let keys = self.one_rtt_keys.as_mut().ok_or(PacketError::Drop)?;

                // header protection first, with the current header key
                let (truncated, header_len) = vesper_quic_core::crypto::header_crypto::remove(
                    keys.opener().header_key(),
                    space_kind,
                    pn_offset,
                    bytes,
                )
                .map_err(|_| PacketError::Drop)?;
                let pn = truncated.expand(space_kind, largest_processed);
                let phase = packet::KeyPhase::from_tag(bytes[0]);

                let (header, payload) = bytes.split_at_mut(header_len);
                let retire_after = self
                    .paths
                    .get(path_id)
                    .map(|path| {
                        path.rtt_estimator
                            .pto_period(1, PacketNumberSpace::ApplicationData)
                    })
                    .unwrap_or(core::time::Duration::from_millis(999));

                match keys.open(
                    &self.provider,
                    phase,
                    pn.as_u64(),
                    header,
                    payload,
                    now,
                    retire_after,
                ) {
                    Ok((len, updated)) => (pn, header_len..header_len + len, updated),
                    Err(_) => {
                        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
                        //# In addition to counting packets sent, endpoints MUST
                        //# count the number of received packets that fail
                        //# authentication during the lifetime of a connection.
                        if keys.on_open_failed() {
                            return Err(PacketError::Close(
                                transport::Error::AEAD_LIMIT_REACHED,
                            ));
                        }
                        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
                        //# packets that fail authentication are discarded
                        return Err(PacketError::Drop);
                    }
                }
            }
        };

        // replay/duplicate rejection happens against the ack tracker
        let payload = &bytes[payload_range];
        let mut elicitation = frame::AckElicitation::NonEliciting;
        let mut frames: Vec<Frame> = Vec::new();
        for decoded in frame::FrameIter::new(payload) {
            let decoded = decoded.map_err(|error| PacketError::Close(error.into()))?;
            elicitation = elicitation.merge(decoded.ack_elicitation());
            frames.push(decoded);
        }

        let space = match space_kind {
            PacketNumberSpace::Initial => &mut self.initial_space,
            PacketNumberSpace::Handshake => &mut self.handshake_space,
            PacketNumberSpace::ApplicationData => &mut self.app_spaces[space_index],
        };
        if space.is_discarded() {
            return Err(PacketError::Drop);
        }
        match space.ack_tracker.on_packet_received(
            packet_number.as_u64(),
            elicitation.is_ack_eliciting(),
            ecn,
            now,
        ) {
            ack::Outcome::Duplicate => return Err(PacketError::Drop),
            ack::Outcome::New => {}
        }
        space.on_packet_processed(packet_number);

        if matches!(space_kind, PacketNumberSpace::Initial) {
            if let Some(scid) = peer_source_cid {
                self.paths.on_initial_source_cid(scid);
            }
        }

        if key_update {
            let phase = self.one_rtt_keys.as_ref().map(|keys| keys.phase());
            if let Some(phase) = phase {
                self.publish(event::Event::KeyUpdated { phase });
            }
        }

        // a server packet on a long header validates the client's path
        let _ = is_long;

        for frame in frames {
            self.dispatch_frame(frame, space_kind, space_index, path_id, now)
                .map_err(PacketError::Close)?;
        }

        Ok(())
    }

    fn dispatch_frame(
        &mut self,
        frame: Frame<'_>,
        space_kind: PacketNumberSpace,
        space_index: usize,
        path_id: PathId,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        use Frame::*;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
        //# The payload of a packet that contains frames MUST contain at
        //# least one frame, and MAY contain multiple frames and multiple
        //# frame types.  An endpoint MUST treat receipt of a frame in a
        //# packet type that is not permitted as a connection error of type
        //# PROTOCOL_VIOLATION.
        let app_only = matches!(space_kind, PacketNumberSpace::ApplicationData);

        match frame {
            Padding(_) | Ping(_) => Ok(()),

            Ack(ack) => self.on_ack_frame(&ack, space_kind, space_index, path_id, now),

            Crypto(crypto) => self.on_crypto_frame(&crypto, space_kind, space_index, now),

            ConnectionClose(close) => {
                let error = if close.is_application_close() {
                    connection::Error::Application {
                        error: application::Error::new(close.error_code),
                        initiator: endpoint::Type::Server,
                    }
                } else {
                    connection::Error::PeerTransport(transport::Error::new(close.error_code))
                };

                //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.2
                //# An endpoint that receives a CONNECTION_CLOSE frame MAY
                //# send a single packet containing a CONNECTION_CLOSE frame
                //# before entering the draining state
                self.enter_draining(error, now);
                Ok(())
            }

            HandshakeDone(_) => {
                if !app_only {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("HANDSHAKE_DONE outside 1-RTT"));
                }
                self.on_handshake_done(now);
                Ok(())
            }

            NewToken(token) => {
                if !app_only {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("NEW_TOKEN outside 1-RTT"));
                }
                self.received_tokens.push(Bytes::copy_from_slice(token.token));
                Ok(())
            }

            Stream(stream) => {
                require_app(app_only)?;
                self.streams.on_stream_frame(&stream)?;
                self.drain_stream_events();
                Ok(())
            }
            ResetStream(reset) => {
                require_app(app_only)?;
                self.streams.on_reset_stream_frame(&reset)?;
                self.drain_stream_events();
                Ok(())
            }
            StopSending(stop) => {
                require_app(app_only)?;
                self.streams.on_stop_sending_frame(&stop)
            }
            MaxData(frame) => {
                require_app(app_only)?;
                self.streams.on_max_data_frame(&frame);
                Ok(())
            }
            MaxStreamData(frame) => {
                require_app(app_only)?;
                self.streams.on_max_stream_data_frame(&frame)
            }
            MaxStreams(frame) => {
                require_app(app_only)?;
                self.streams.on_max_streams_frame(&frame);
                Ok(())
            }
            DataBlocked(_) | StreamDataBlocked(_) | StreamsBlocked(_) => {
                // informational only
                require_app(app_only)
            }

            NewConnectionId(frame) => {
                require_app(app_only)?;
                self.paths.on_new_connection_id(&frame)
            }
            RetireConnectionId(_) => {
                // we never issue new local connection ids beyond the
                // initial one, so there is nothing to retire
                require_app(app_only)
            }

            PathChallenge(challenge) => {
                require_app(app_only)?;
                self.paths.on_path_challenge(path_id, &challenge);
                self.drain_path_events();
                Ok(())
            }
            PathResponse(response) => {
                require_app(app_only)?;
                let mds = self
                    .peer_params
                    .as_ref()
                    .map(|params| {
                        params
                            .max_udp_payload_size
                            .as_u64()
                            .min(self.limits.max_udp_payload_size() as u64) as u16
                    })
                    .unwrap_or(vesper_quic_core::path::MINIMUM_MAX_DATAGRAM_SIZE);
                if self.paths.on_path_response(path_id, &response, mds) {
                    self.ensure_app_space(path_id);
                }
                self.drain_path_events();
                Ok(())
            }

            Datagram(datagram) => {
                require_app(app_only)?;
                self.on_datagram_frame(datagram.data);
                Ok(())
            }
        }
    }

    fn on_ack_frame(
        &mut self,
        ack: &frame::Ack,
        space_kind: PacketNumberSpace,
        space_index: usize,
        path_id: PathId,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let exponent = self
            .peer_params
            .as_ref()
            .map(|params| params.ack_delay_exponent)
            .unwrap_or(3);
        let ack_delay = ack.ack_delay_duration(exponent);

        let outcome = {
            let space = match space_kind {
                PacketNumberSpace::Initial => &mut self.initial_space,
                PacketNumberSpace::Handshake => &mut self.handshake_space,
                PacketNumberSpace::ApplicationData => &mut self.app_spaces[space_index],
            };
            let path = self
                .paths
                .get_mut(path_id)
                .ok_or(transport::Error::INTERNAL_ERROR)?;
            space.on_ack_frame(ack, ack_delay, self.handshake_confirmed, path, now)?
        };

        // ECN-CE feedback
        if let Some(counts) = &ack.ecn_counts {
            if counts.ce_count > 0 {
                if let Some(path) = self.paths.get_mut(path_id) {
                    path.congestion_controller.on_ecn_ce(counts.ce_count, now);
                }
            }
        }

        for (_, info) in outcome.newly_acked {
            self.on_manifest_acked(info.data, space_kind, space_index);
        }
        for (_, info) in outcome.lost {
            self.stats_packets_lost += 1;
            self.on_manifest_lost(info.data);
        }
        Ok(())
    }

    fn on_crypto_frame(
        &mut self,
        crypto: &frame::Crypto,
        space_kind: PacketNumberSpace,
        space_index: usize,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let level = Level::from_space(space_kind);
        let space = match space_kind {
            PacketNumberSpace::Initial => &mut self.initial_space,
            PacketNumberSpace::Handshake => &mut self.handshake_space,
            PacketNumberSpace::ApplicationData => &mut self.app_spaces[space_index],
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
        //# The stream does not have an explicit end, so CRYPTO frames do
        //# not have a FIN bit.
        space
            .crypto_rx
            .write_at(crypto.offset.as_u64(), crypto.data, false)
            .map_err(|_| transport::Error::CRYPTO_BUFFER_EXCEEDED)?;

        if space.crypto_rx.contiguous_offset() > space.crypto_rx.read_offset() {
            let contiguous = space.crypto_rx.pop_all();
            if contiguous.len() > self.limits.crypto_buffer_len() {
                return Err(transport::Error::CRYPTO_BUFFER_EXCEEDED);
            }
            let output = self.tls.process_crypto(level, &contiguous)?;
            self.on_tls_output(output, now)
                .map_err(|_| transport::Error::INTERNAL_ERROR)?;
        }
        Ok(())
    }

    fn on_handshake_done(&mut self, _now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
        //# the TLS handshake is considered confirmed at the
        //# client when the client receives a HANDSHAKE_DONE frame
        if self.handshake_confirmed {
            return;
        }
        self.handshake_confirmed = true;

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
        //# An endpoint MUST discard its Handshake keys when the TLS
        //# handshake is confirmed
        self.discard_handshake_space();

        if self.state == State::Handshaking {
            self.state = State::Connected;
        }
        self.publish(event::Event::HandshakeConfirmed);
    }

    fn on_datagram_frame(&mut self, data: &[u8]) {
        if self.limits.max_datagram_frame_size() == VarInt::ZERO {
            // we did not advertise support; receipt is a protocol error
            // surfaced by dispatch, but tolerated here as a drop
            return;
        }
        let len = data.len();
        let dropped = self.datagram_rx.push(Bytes::copy_from_slice(data));
        if dropped > 0 {
            self.publish(event::Event::DatagramDropped { count: dropped });
        }
        self.publish(event::Event::DatagramReceived { len });
    }

    fn drain_stream_events(&mut self) {
        for event in self.streams.take_events() {
            self.publish(event);
        }
    }

    fn drain_path_events(&mut self) {
        for event in self.paths.take_events() {
            self.publish(event);
        }
    }

    // === manifest resolution ======================================

    fn on_manifest_acked(
        &mut self,
        manifest: Manifest,
        space_kind: PacketNumberSpace,
        space_index: usize,
    ) {
        for entry in manifest {
            match entry {
                SentFrame::Ack { largest } => {
                    let space = match space_kind {
                        PacketNumberSpace::Initial => &mut self.initial_space,
                        PacketNumberSpace::Handshake => &mut self.handshake_space,
                        PacketNumberSpace::ApplicationData => {
                            &mut self.app_spaces[space_index]
                        }
                    };
                    space.ack_tracker.on_ack_frame_acked(largest);
                }
                SentFrame::Crypto { offset, len } => {
                    let space = match space_kind {
                        PacketNumberSpace::Initial => &mut self.initial_space,
                        PacketNumberSpace::Handshake => &mut self.handshake_space,
                        PacketNumberSpace::ApplicationData => {
                            &mut self.app_spaces[space_index]
                        }
                    };
                    space.crypto_tx.on_range_acked(offset, len);
                }
                SentFrame::Stream { id, range } => {
                    self.streams.on_range_acked(id, range);
                    self.drain_stream_events();
                }
                SentFrame::ResetStream { id, .. } => self.streams.on_reset_acked(id),
                SentFrame::StopSending { .. }
                | SentFrame::MaxData
                | SentFrame::MaxStreamData { .. }
                | SentFrame::MaxStreams { .. }
                | SentFrame::RetireConnectionId { .. }
                | SentFrame::PathChallenge { .. } => {}
            }
        }
    }

    fn on_manifest_lost(&mut self, manifest: Manifest) {
        for entry in manifest {
            match entry {
                SentFrame::Ack { .. } => {}
                SentFrame::Crypto { offset, len } => {
                    // losses land in whichever space still holds the data;
                    // discarded spaces ignore them
                    for space in [&mut self.initial_space, &mut self.handshake_space]
                        .into_iter()
                        .chain(self.app_spaces.iter_mut())
                    {
                        if !space.is_discarded() {
                            space.crypto_tx.on_range_lost(offset, len);
                        }
                    }
                }
                SentFrame::Stream { id, range } => self.streams.on_range_lost(id, range),
                SentFrame::ResetStream {
                    id,
                    error,
                    final_size,
                } => self.streams.on_reset_lost(id, error, final_size),
                SentFrame::StopSending { id } => self.streams.on_stop_sending_lost(id),
                SentFrame::MaxData => self.streams.recv_flow.retransmit_credit_update(),
                SentFrame::MaxStreamData { id } => self.streams.on_max_stream_data_lost(id),
                SentFrame::MaxStreams { .. } => {}
                SentFrame::RetireConnectionId { sequence } => {
                    self.paths.on_retirement_lost(sequence)
                }
                SentFrame::PathChallenge { .. } => {
                    // the challenge retransmit timer re-sends on its own
                }
            }
        }
    }

    // === application surface ======================================

    pub fn open_stream(
        &mut self,
        stream_type: StreamType,
    ) -> Result<StreamId, crate::stream::manager::OpenError> {
        self.streams.open(stream_type)
    }

    pub fn stream_write(
        &mut self,
        id: StreamId,
        data: Bytes,
        fin: bool,
    ) -> Result<(), transport::Error> {
        self.streams.write(id, data, fin)
    }

    pub fn stream_read(
        &mut self,
        id: StreamId,
        max: usize,
    ) -> Result<ReadOutcome, transport::Error> {
        let outcome = self.streams.read(id, max);
        self.drain_stream_events();
        outcome
    }

    pub fn stream_reset(
        &mut self,
        id: StreamId,
        error: application::Error,
    ) -> Result<(), transport::Error> {
        self.streams.reset(id, error)
    }

    pub fn stream_stop_sending(
        &mut self,
        id: StreamId,
        error: application::Error,
    ) -> Result<(), transport::Error> {
        self.streams.stop_sending(id, error)
    }

    pub fn send_datagram(
        &mut self,
        data: Bytes,
    ) -> Result<(), vesper_quic_core::datagram::SendError> {
        let dropped = self.datagram_tx.push(data)?;
        if dropped > 0 {
            self.publish(event::Event::DatagramDropped { count: dropped });
        }
        Ok(())
    }

    pub fn recv_datagram(&mut self) -> Option<Bytes> {
        self.datagram_rx.pop()
    }

    pub fn migrate(
        &mut self,
        new_local: vesper_quic_core::inet::SocketAddress,
        now: Timestamp,
    ) -> Result<PathId, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-9
        //# An endpoint MUST NOT initiate connection migration before the
        //# handshake is confirmed
        if !self.handshake_confirmed {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("migration before handshake confirmation"));
        }
        let pto = self.pto_duration();
        let challenge_data = self.random.gen_array::<8>();
        let result = self.paths.migrate(new_local, challenge_data, pto, now);
        if let Ok(id) = result {
            self.ensure_app_space(id);
        }
        result
    }

    pub fn stats(&self) -> Stats {
        let path = self.paths.get(self.paths.active_id());
        Stats {
            smoothed_rtt: path
                .map(|path| path.rtt_estimator.smoothed_rtt())
                .unwrap_or_default(),
            min_rtt: path
                .map(|path| path.rtt_estimator.min_rtt())
                .unwrap_or_default(),
            congestion_window: path
                .map(|path| path.congestion_controller.congestion_window())
                .unwrap_or_default(),
            bytes_in_flight: path
                .map(|path| path.congestion_controller.bytes_in_flight())
                .unwrap_or_default(),
            packets_sent: self.stats_packets_sent,
            packets_received: self.stats_packets_received,
            packets_lost: self.stats_packets_lost,
            datagrams_dropped: self.datagram_tx.dropped() + self.datagram_rx.dropped(),
            path_count: self.paths.iter().count(),
            key_phase: match self.one_rtt_keys.as_ref().map(OneRttKeys::phase) {
                Some(packet::KeyPhase::One) => 1,
                _ => 0,
            },
            handshake_confirmed: self.handshake_confirmed,
        }
    }

    pub fn is_readable(&self, id: StreamId) -> bool {
        self.streams.is_readable(id)
    }

    // === transmission =============================================

    /// Builds at most one outgoing datagram into `buffer`.
    ///
    /// Returns the datagram length and destination, or `None` when there
    /// is nothing to send (or budgets forbid sending).
    pub fn transmit(
        &mut self,
        buffer: &mut [u8],
        now: Timestamp,
    ) -> Option<(usize, AddressPair)> {
        match &self.state {
            State::Closed { .. } | State::Draining { .. } => None,
            State::Closing { error, respond } => {
                if !*respond {
                    return None;
                }
                let error = error.clone();
                self.transmit_close(buffer, &error, now)
            }
            State::Handshaking | State::Connected => self.transmit_open(buffer, now),
        }
    }

    fn transmit_close(
        &mut self,
        buffer: &mut [u8],
        error: &connection::Error,
        now: Timestamp,
    ) -> Option<(usize, AddressPair)> {
        let close_frame = match error {
            connection::Error::Transport(error) => PlannedFrame::ConnectionClose { error: *error },
            connection::Error::Application { error, .. } => PlannedFrame::ApplicationClose {
                error: *error,
                reason: Bytes::new(),
            },
            _ => PlannedFrame::ConnectionClose {
                error: transport::Error::NO_ERROR,
            },
        };

        // send at the highest available level
        let path_id = self.paths.active_id();
        let (len, addresses) = if self.one_rtt_keys.is_some() {
            self.build_app_packet(buffer, path_id, alloc::vec![close_frame], now)?
        } else if self.handshake_keys.is_some() {
            self.build_long_packet(
                buffer,
                PacketType::Handshake,
                alloc::vec![close_frame],
                now,
            )?
        } else {
            self.build_long_packet(buffer, PacketType::Initial, alloc::vec![close_frame], now)?
        };

        if let State::Closing { respond, .. } = &mut self.state {
            *respond = false;
        }
        Some((len, addresses))
    }

    fn transmit_open(&mut self, buffer: &mut [u8], now: Timestamp) -> Option<(usize, AddressPair)> {
        // handshake spaces first, in order
        if self.initial_keys.is_some() && self.initial_space.has_transmission_interest() {
            if let Some(result) = self.transmit_handshake_space(buffer, PacketType::Initial, now) {
                return Some(result);
            }
        }
        if self.handshake_keys.is_some() && self.handshake_space.has_transmission_interest() {
            if let Some(result) = self.transmit_handshake_space(buffer, PacketType::Handshake, now)
            {
                return Some(result);
            }
        }
        if self.one_rtt_keys.is_some() {
            return self.transmit_app(buffer, now);
        }
        None
    }

    fn transmit_handshake_space(
        &mut self,
        buffer: &mut [u8],
        packet_type: PacketType,
        now: Timestamp,
    ) -> Option<(usize, AddressPair)> {
        let mut frames: Vec<PlannedFrame> = Vec::new();

        let space = match packet_type {
            PacketType::Initial => &mut self.initial_space,
            _ => &mut self.handshake_space,
        };

        if let Some(ack) = space.ack_tracker.ack_frame(now) {
            frames.push(PlannedFrame::Ack(ack));
        }

        // probes retransmit outstanding handshake data
        if space.pto.transmissions_owed() > 0 {
            space.pto.on_transmit();
            if !space.crypto_tx.has_transmission_interest() {
                frames.push(PlannedFrame::Ping);
            }
        }

        let budget = buffer.len().min(1200).saturating_sub(64);
        if let Some((offset, data)) = space.crypto_tx.next_transmission(budget) {
            frames.push(PlannedFrame::Crypto {
                offset: VarInt::new(offset).unwrap_or(VarInt::MAX),
                data,
            });
        }

        if frames.is_empty() {
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
        //# A client MUST expand the payload of all UDP datagrams carrying
        //# Initial packets to at least the smallest allowed maximum
        //# datagram size of 1200 bytes
        if matches!(packet_type, PacketType::Initial) {
            // padding the payload alone to 1200 keeps the datagram above
            // the floor for any header layout
            let current: usize = frames.iter().map(PlannedFrame::encoding_size).sum();
            if current < 1200 {
                frames.push(PlannedFrame::Padding {
                    len: 1200 - current,
                });
            }
        }

        self.build_long_packet(buffer, packet_type, frames, now)
    }

    fn transmit_app(&mut self, buffer: &mut [u8], now: Timestamp) -> Option<(usize, AddressPair)> {
        // challenges and responses ride their own paths
        for (path_id, data) in self.paths.pending_challenges(now) {
            let frames = alloc::vec![
                PlannedFrame::PathChallenge { path_id, data },
                PlannedFrame::Padding { len: 32 },
            ];
            if let Some(result) = self.build_app_packet(buffer, path_id, frames, now) {
                return Some(result);
            }
        }
        for (path_id, data) in self.paths.take_pending_responses() {
            let frames = alloc::vec![PlannedFrame::PathResponse { data }];
            if let Some(result) = self.build_app_packet(buffer, path_id, frames, now) {
                return Some(result);
            }
        }

        let path_id = self.paths.select_path(now, 256)?;
        let space_index = self.app_space_index(path_id);
        let mds = self
            .paths
            .get(path_id)
            .map(|path| path.max_datagram_size() as usize)
            .unwrap_or(1200)
            .min(buffer.len());

        let mut frames: Vec<PlannedFrame> = Vec::new();
        let mut remaining = mds.saturating_sub(64);

        if let Some(ack) = self.app_spaces[space_index].ack_tracker.ack_frame(now) {
            remaining = remaining.saturating_sub(PlannedFrame::Ack(ack.clone()).encoding_size());
            frames.push(PlannedFrame::Ack(ack));
        }

        let probe_owed = self.app_spaces[space_index].pto.transmissions_owed() > 0;
        if probe_owed {
            self.app_spaces[space_index].pto.on_transmit();
        }

        // 1-RTT crypto (tickets) before application data
        if let Some((offset, data)) =
            self.app_spaces[space_index].crypto_tx.next_transmission(remaining)
        {
            remaining = remaining.saturating_sub(data.len() + 8);
            frames.push(PlannedFrame::Crypto {
                offset: VarInt::new(offset).unwrap_or(VarInt::MAX),
                data,
            });
        }

        for control in self.streams.pending_control_frames() {
            let frame = control_to_planned(control);
            remaining = remaining.saturating_sub(frame.encoding_size());
            frames.push(frame);
        }

        for sequence in self.paths.take_retirements() {
            let frame = PlannedFrame::RetireConnectionId { sequence };
            remaining = remaining.saturating_sub(frame.encoding_size());
            frames.push(frame);
        }

        // datagrams compete with streams for the remainder
        if let Some(data) = self.datagram_tx.pop_fitting(remaining) {
            remaining = remaining.saturating_sub(data.len() + 4);
            frames.push(PlannedFrame::Datagram { data });
        }

        while remaining > 16 {
            let Some(tx) = self.streams.next_transmission(remaining - 16) else {
                break;
            };
            remaining = remaining.saturating_sub(tx.data.len() + 16);
            frames.push(PlannedFrame::Stream {
                id: tx.id,
                offset: tx.offset,
                data: tx.data,
                fin: tx.fin,
            });
        }

        if core::mem::take(&mut self.keep_alive_ping_owed) {
            frames.push(PlannedFrame::Ping);
        }

        if frames.is_empty() {
            if probe_owed {
                frames.push(PlannedFrame::Ping);
            } else {
                return None;
            }
        }

        self.build_app_packet(buffer, path_id, frames, now)
    }

    fn build_long_packet(
        &mut self,
        buffer: &mut [u8],
        packet_type: PacketType,
        frames: Vec<PlannedFrame>,
        now: Timestamp,
    ) -> Option<(usize, AddressPair)> {
        let path_id = self.paths.active_id();
        let token = if packet_type.has_token() {
            self.address_validation_token.clone()
        } else {
            Bytes::new()
        };
        let header = HeaderPlan::Long {
            packet_type,
            version: self.version,
            destination_cid: self.paths.peer_cid_for(path_id),
            source_cid: self.source_cid,
            token,
        };

        let (space, keys) = match packet_type {
            PacketType::Initial => (&mut self.initial_space, self.initial_keys.as_ref()?),
            _ => (&mut self.handshake_space, self.handshake_keys.as_ref()?),
        };

        let packet_number = space.next_packet_number();
        let len = transmission::build_packet(
            buffer,
            &header,
            packet_number,
            space.largest_acked,
            &frames,
            &keys.sealer.key,
            keys.sealer.header_key(),
        )
        .ok()?;

        self.finish_packet(packet_number, packet_type.space().unwrap_or(PacketNumberSpace::ApplicationData), path_id, &frames, len, now)
    }

    fn build_app_packet(
        &mut self,
        buffer: &mut [u8],
        path_id: PathId,
        frames: Vec<PlannedFrame>,
        now: Timestamp,
    ) -> Option<(usize, AddressPair)> {
        let space_index = self.app_space_index(path_id);
        let header = HeaderPlan::Short {
            destination_cid: self.paths.peer_cid_for(path_id),
            key_phase: self.one_rtt_keys.as_ref()?.phase(),
        };

        let packet_number = self.app_spaces[space_index].next_packet_number();
        let largest_acked = self.app_spaces[space_index].largest_acked;
        let retire_after = self.pto_duration();

        let len = {
            let keys = self.one_rtt_keys.as_mut()?;
            let len = transmission::build_packet(
                buffer,
                &header,
                packet_number,
                largest_acked,
                &frames,
                &keys.sealer().key,
                keys.sealer().header_key(),
            )
            .ok()?;

            //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
            //# Endpoints MUST count the number of encrypted packets for each
            //# set of keys.
            if keys.on_packet_sealed() {
                keys.initiate_update(&self.provider, now, retire_after);
            }
            len
        };

        self.finish_packet(
            packet_number,
            PacketNumberSpace::ApplicationData,
            path_id,
            &frames,
            len,
            now,
        )
    }

    fn finish_packet(
        &mut self,
        packet_number: PacketNumber,
        space_kind: PacketNumberSpace,
        path_id: PathId,
        frames: &[PlannedFrame],
        len: usize,
        now: Timestamp,
    ) -> Option<(usize, AddressPair)> {
        let manifest: Manifest = frames.iter().filter_map(PlannedFrame::manifest_entry).collect();
        let ack_eliciting = frames.iter().any(PlannedFrame::is_ack_eliciting);
        let in_flight = ack_eliciting
            || frames
                .iter()
                .any(|frame| matches!(frame, PlannedFrame::Padding { .. }));

        let space_index = self.app_space_index(path_id);
        let addresses = {
            let path = self.paths.get_mut(path_id)?;
            let space = match space_kind {
                PacketNumberSpace::Initial => &mut self.initial_space,
                PacketNumberSpace::Handshake => &mut self.handshake_space,
                PacketNumberSpace::ApplicationData => &mut self.app_spaces[space_index],
            };
            space.on_packet_sent(
                packet_number,
                manifest,
                len,
                ack_eliciting,
                in_flight,
                path,
                now,
            );
            path.on_bytes_transmitted(len);
            path.addresses
        };

        self.stats_packets_sent += 1;
        Some((len, addresses))
    }

    /// True when the connection has something it wants to transmit
    pub fn has_transmission_interest(&self, now: Timestamp) -> bool {
        match &self.state {
            State::Closed { .. } | State::Draining { .. } => false,
            State::Closing { respond, .. } => *respond,
            _ => {
                let _ = now;
                (self.initial_keys.is_some() && self.initial_space.has_transmission_interest())
                    || (self.handshake_keys.is_some()
                        && self.handshake_space.has_transmission_interest())
                    || (self.one_rtt_keys.is_some()
                        && (self.keep_alive_ping_owed
                            || self
                                .app_spaces
                                .iter()
                                .any(PacketSpace::has_transmission_interest)
                            || self.streams.has_transmission_interest()
                            || !self.datagram_tx.is_empty()))
            }
        }
    }
}

enum SpaceRef {
    Initial,
    Handshake,
    #[allow(dead_code)]
    App(usize),
}

enum PacketError {
    /// Silently drop the packet
    Drop,
    /// Close the connection with a transport error
    Close(transport::Error),
}

#[inline]
fn require_app(app_only: bool) -> Result<(), transport::Error> {
    if app_only {
        Ok(())
    } else {
        Err(transport::Error::PROTOCOL_VIOLATION.with_reason("frame in wrong encryption level"))
    }
}

fn control_to_planned(control: ControlFrame) -> PlannedFrame {
    match control {
        ControlFrame::ResetStream {
            id,
            error,
            final_size,
        } => PlannedFrame::ResetStream {
            id,
            error,
            final_size,
        },
        ControlFrame::StopSending { id, error } => PlannedFrame::StopSending { id, error },
        ControlFrame::MaxStreamData { id, limit } => PlannedFrame::MaxStreamData { id, limit },
        ControlFrame::MaxData { limit } => PlannedFrame::MaxData { limit },
        ControlFrame::StreamDataBlocked { id, limit } => {
            PlannedFrame::StreamDataBlocked { id, limit }
        }
        ControlFrame::DataBlocked { limit } => PlannedFrame::DataBlocked { limit },
        ControlFrame::MaxStreams { stream_type, limit } => {
            PlannedFrame::MaxStreams { stream_type, limit }
        }
        ControlFrame::StreamsBlocked { stream_type, limit } => {
            PlannedFrame::StreamsBlocked { stream_type, limit }
        }
    }
}
