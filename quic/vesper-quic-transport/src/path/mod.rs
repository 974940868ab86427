// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection's path table: validation, migration, connection ID
//! bookkeeping, and the multipath transmission scheduler.

use alloc::vec::Vec;
use smallvec::SmallVec;
use vesper_quic_core::{
    connection::ConnectionId,
    event::Event,
    frame,
    inet::{AddressPair, SocketAddress},
    path::{self, challenge::Challenge, Path},
    recovery::{Algorithm, Controller, RttEstimator},
    stateless_reset,
    time::{earliest, Timestamp},
    transport,
    varint::VarInt,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-9
//# The design of QUIC relies on endpoints retaining a stable address
//# for the duration of the handshake.

/// A connection ID issued by the peer
#[derive(Clone, Copy, Debug)]
struct PeerCid {
    sequence: VarInt,
    connection_id: ConnectionId,
    stateless_reset_token: stateless_reset::Token,
    /// Bound to a path, or free for a future migration
    in_use_by: Option<path::Id>,
}

#[derive(Debug)]
pub struct Manager {
    paths: Vec<Path>,
    active: path::Id,

    peer_cids: Vec<PeerCid>,
    /// Largest retire_prior_to seen
    retire_prior_to: VarInt,
    /// RETIRE_CONNECTION_ID frames owed to the peer
    retire_pending: Vec<VarInt>,

    /// PATH_RESPONSE payloads owed, per receiving path
    response_pending: SmallVec<[(path::Id, [u8; 8]); 2]>,

    multipath_enabled: bool,
    /// The peer's disable_active_migration transport parameter
    migration_disabled: bool,
    active_connection_id_limit: u64,
    congestion_algorithm: Algorithm,

    /// Rotates selection among equally ranked paths across calls
    tie_cursor: usize,

    events: Vec<Event>,
}

impl Manager {
    pub fn new(
        addresses: AddressPair,
        initial_peer_cid: ConnectionId,
        congestion_algorithm: Algorithm,
    ) -> Self {
        let mut path = Path::new(
            path::Id::ZERO,
            addresses,
            Controller::new(congestion_algorithm, path::MINIMUM_MAX_DATAGRAM_SIZE),
            RttEstimator::default(),
        );
        // the handshake path is validated implicitly by the handshake
        path.on_validated(path::MINIMUM_MAX_DATAGRAM_SIZE);

        Self {
            paths: alloc::vec![path],
            active: path::Id::ZERO,
            peer_cids: alloc::vec![PeerCid {
                sequence: VarInt::ZERO,
                connection_id: initial_peer_cid,
                stateless_reset_token: stateless_reset::Token::ZEROED,
                in_use_by: Some(path::Id::ZERO),
            }],
            retire_prior_to: VarInt::ZERO,
            retire_pending: Vec::new(),
            response_pending: SmallVec::new(),
            multipath_enabled: false,
            migration_disabled: false,
            active_connection_id_limit: 2,
            congestion_algorithm,
            tie_cursor: 0,
            events: Vec::new(),
        }
    }

    pub fn on_transport_parameters(
        &mut self,
        disable_active_migration: bool,
        active_connection_id_limit: VarInt,
        stateless_reset_token: Option<stateless_reset::Token>,
        multipath_enabled: bool,
    ) {
        self.migration_disabled = disable_active_migration;
        self.active_connection_id_limit = active_connection_id_limit.as_u64();
        self.multipath_enabled = multipath_enabled;
        if let Some(token) = stateless_reset_token {
            if let Some(cid) = self.peer_cids.first_mut() {
                cid.stateless_reset_token = token;
            }
        }
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        core::mem::take(&mut self.events)
    }

    #[inline]
    pub fn active_id(&self) -> path::Id {
        self.active
    }

    #[inline]
    pub fn active(&mut self) -> &mut Path {
        let index = self.active.as_u8() as usize;
        &mut self.paths[index]
    }

    #[inline]
    pub fn get(&self, id: path::Id) -> Option<&Path> {
        self.paths.get(id.as_u8() as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: path::Id) -> Option<&mut Path> {
        self.paths.get_mut(id.as_u8() as usize)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Path> {
        self.paths.iter_mut()
    }

    /// The peer connection ID to put in packets on `id`
    pub fn peer_cid_for(&self, id: path::Id) -> ConnectionId {
        self.peer_cids
            .iter()
            .find(|cid| cid.in_use_by == Some(id))
            .map(|cid| cid.connection_id)
            .unwrap_or_else(|| {
                self.peer_cids
                    .first()
                    .map(|cid| cid.connection_id)
                    .unwrap_or(ConnectionId::EMPTY)
            })
    }

    /// Locates (or creates accounting for) the path a datagram arrived on
    pub fn on_datagram_received(
        &mut self,
        addresses: &AddressPair,
        len: usize,
    ) -> path::Id {
        if let Some(path) = self
            .paths
            .iter_mut()
            .find(|path| path.addresses == *addresses)
        {
            path.on_bytes_received(len);
            return path.id;
        }
        // an unknown source address on a client is fed to the active
        // path's accounting; clients do not accept peer-initiated paths
        let active = self.active;
        if let Some(path) = self.get_mut(active) {
            path.on_bytes_received(len);
        }
        active
    }

    /// Handles a NEW_CONNECTION_ID frame
    pub fn on_new_connection_id(
        &mut self,
        frame: &frame::NewConnectionId,
    ) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# After processing a NEW_CONNECTION_ID frame and adding and
        //# retiring active connection IDs, if the number of active
        //# connection IDs exceeds the value advertised in its
        //# active_connection_id_limit transport parameter, an endpoint MUST
        //# close the connection with an error of type
        //# CONNECTION_ID_LIMIT_ERROR.
        if self
            .peer_cids
            .iter()
            .any(|cid| cid.sequence == frame.sequence_number)
        {
            // retransmission of a known issuance
            return Ok(());
        }

        self.peer_cids.push(PeerCid {
            sequence: frame.sequence_number,
            connection_id: frame.connection_id,
            stateless_reset_token: frame.stateless_reset_token,
            in_use_by: None,
        });

        if frame.retire_prior_to > self.retire_prior_to {
            self.retire_prior_to = frame.retire_prior_to;
            let retire_prior_to = self.retire_prior_to;
            let retire_pending = &mut self.retire_pending;
            self.peer_cids.retain(|cid| {
                if cid.sequence < retire_prior_to {
                    retire_pending.push(cid.sequence);
                    false
                } else {
                    true
                }
            });
        }

        if self.peer_cids.len() as u64 > self.active_connection_id_limit {
            return Err(transport::Error::CONNECTION_ID_LIMIT_ERROR);
        }
        Ok(())
    }

    /// Adopts the server's source connection ID from its first Initial.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
    //# Upon first receiving an Initial or Retry packet from the server, the
    //# client uses the Source Connection ID supplied by the server as the
    //# Destination Connection ID for subsequent packets
    pub fn on_initial_source_cid(&mut self, cid: ConnectionId) {
        if let Some(first) = self.peer_cids.first_mut() {
            first.connection_id = cid;
        }
    }

    /// RETIRE_CONNECTION_ID frames owed to the peer
    pub fn take_retirements(&mut self) -> Vec<VarInt> {
        core::mem::take(&mut self.retire_pending)
    }

    /// Re-queues a lost retirement
    pub fn on_retirement_lost(&mut self, sequence: VarInt) {
        if !self.retire_pending.contains(&sequence) {
            self.retire_pending.push(sequence);
        }
    }

    /// Starts client-initiated migration to a new local address.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-9
    //# An endpoint MUST NOT initiate connection migration before the
    //# handshake is confirmed
    pub fn migrate(
        &mut self,
        new_local: SocketAddress,
        challenge_data: [u8; 8],
        pto: core::time::Duration,
        now: Timestamp,
    ) -> Result<path::Id, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-9
        //# If the peer sent the disable_active_migration transport
        //# parameter, an endpoint also MUST NOT send packets (including
        //# probing packets; see Section 9.1) from a different local address
        if self.migration_disabled {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("peer disabled active migration"));
        }
        if self.paths.len() as u64 >= self.active_connection_id_limit.max(2) {
            return Err(transport::Error::NO_VIABLE_PATH
                .with_reason("path candidate set exhausted"));
        }

        // bind an unused peer connection ID to the new path
        let id = path::Id::new(self.paths.len() as u8);
        let cid = self
            .peer_cids
            .iter_mut()
            .find(|cid| cid.in_use_by.is_none());
        match cid {
            Some(cid) => cid.in_use_by = Some(id),
            //= https://www.rfc-editor.org/rfc/rfc9000#section-9.5
            //# An endpoint MUST NOT reuse a connection ID when sending
            //# from more than one local address
            None => {
                return Err(transport::Error::NO_VIABLE_PATH
                    .with_reason("no spare connection id for migration"))
            }
        }

        let remote = self.active().addresses.remote;
        let mut path = Path::new(
            id,
            AddressPair::new(new_local, remote),
            Controller::new(self.congestion_algorithm, path::MINIMUM_MAX_DATAGRAM_SIZE),
            self.active().rtt_estimator.for_new_path(
                vesper_quic_core::recovery::rtt_estimator::DEFAULT_INITIAL_RTT,
            ),
        );

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.1
        //# The endpoint MUST use unpredictable data in every PATH_CHALLENGE
        //# frame
        path.challenge = Challenge::new(now, pto, pto * 3, challenge_data);

        self.paths.push(path);
        Ok(id)
    }

    /// Records a PATH_CHALLENGE from the peer; the response goes out on
    /// the same path
    pub fn on_path_challenge(&mut self, path_id: path::Id, frame: &frame::PathChallenge) {
        self.response_pending.push((path_id, frame.data));
        self.events.push(Event::PathChallengeReceived { path_id });
    }

    /// PATH_RESPONSE payloads owed, per path
    pub fn take_pending_responses(&mut self) -> SmallVec<[(path::Id, [u8; 8]); 2]> {
        core::mem::take(&mut self.response_pending)
    }

    /// Handles a PATH_RESPONSE received on `path_id`.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.3
    //# Path validation succeeds when a PATH_RESPONSE frame is received
    //# that contains the data that was sent in a previous PATH_CHALLENGE
    //# frame.  A PATH_RESPONSE frame received on any network path
    //# validates the path on which the PATH_CHALLENGE was sent.
    pub fn on_path_response(
        &mut self,
        path_id: path::Id,
        frame: &frame::PathResponse,
        negotiated_max_datagram_size: u16,
    ) -> bool {
        let Some(path) = self.get_mut(path_id) else {
            return false;
        };
        if !path.challenge.is_valid_response(&frame.data) {
            return false;
        }
        path.on_validated(negotiated_max_datagram_size);
        let id = path.id;
        self.events.push(Event::PathValidated { path_id: id });

        // a freshly validated migration path becomes active; the old
        // path stays as a backup until its connection IDs retire
        self.active = id;
        true
    }

    /// PATH_CHALLENGE payloads due for (re)transmission on `now`
    pub fn pending_challenges(&mut self, now: Timestamp) -> SmallVec<[(path::Id, [u8; 8]); 2]> {
        let mut due = SmallVec::new();
        for path in self.paths.iter_mut() {
            if let Some(data) = path.challenge.transmission_data(now) {
                due.push((path.id, data));
            }
        }
        due
    }

    /// Fires path timers
    pub fn on_timeout(&mut self, now: Timestamp) {
        for path in self.paths.iter_mut() {
            path.challenge.on_timeout(now);
        }
    }

    pub fn next_expiration(&self) -> Option<Timestamp> {
        earliest(self.paths.iter().map(|path| path.challenge.next_expiration()))
    }

    /// Stateless reset tokens associated with the peer's connection IDs.
    /// The zeroed placeholder (no token issued yet) never participates.
    pub fn reset_tokens(&self) -> impl Iterator<Item = &stateless_reset::Token> {
        self.peer_cids
            .iter()
            .map(|cid| &cid.stateless_reset_token)
            .filter(|token| **token != stateless_reset::Token::ZEROED)
    }

    /// Returns true when multipath transmission is in effect
    pub fn is_multipath_active(&self) -> bool {
        self.multipath_enabled
            && self.paths.iter().filter(|path| path.is_validated()).count() >= 2
    }

    /// Picks the transmission path for the next datagram.
    //= https://datatracker.ietf.org/doc/html/draft-ietf-quic-multipath
    //# implementations can select paths by their measured round-trip
    //# characteristics and per-path congestion state
    pub fn select_path(&mut self, now: Timestamp, len_hint: usize) -> Option<path::Id> {
        if !self.is_multipath_active() {
            let active = self.active;
            let path = self.get(active)?;
            return (path.transmission_budget(now) >= len_hint).then_some(active);
        }

        // rank sendable candidates by smoothed rtt ascending; suspects
        // are skipped until a successful probe clears them
        let mut candidates: Vec<(core::time::Duration, path::Id)> = self
            .paths
            .iter()
            .filter(|path| {
                path.is_validated()
                    && !path.is_suspect()
                    && path.transmission_budget(now) >= len_hint
            })
            .map(|path| (path.rtt_estimator.smoothed_rtt(), path.id))
            .collect();
        candidates.sort();

        let (best_rtt, _) = *candidates.first()?;
        let tied: Vec<path::Id> = candidates
            .iter()
            .take_while(|(rtt, _)| *rtt == best_rtt)
            .map(|(_, id)| *id)
            .collect();

        // equally ranked paths take turns across calls
        let selected = tied[self.tie_cursor % tied.len()];
        self.tie_cursor = self.tie_cursor.wrapping_add(1);
        Some(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_quic_core::time::Duration;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn addresses() -> AddressPair {
        AddressPair::new(
            "10.0.0.1:4433".parse().unwrap(),
            "192.0.2.1:443".parse().unwrap(),
        )
    }

    fn manager() -> Manager {
        let mut manager = Manager::new(
            addresses(),
            ConnectionId::try_from(&[1u8; 8][..]).unwrap(),
            Algorithm::NewReno,
        );
        manager.on_transport_parameters(false, VarInt::from_u8(4), None, false);
        manager
    }

    fn issue_cid(manager: &mut Manager, sequence: u8) {
        manager
            .on_new_connection_id(&frame::NewConnectionId {
                sequence_number: VarInt::from_u8(sequence),
                retire_prior_to: VarInt::ZERO,
                connection_id: ConnectionId::try_from(&[sequence; 8][..]).unwrap(),
                stateless_reset_token: stateless_reset::Token::new([sequence; 16]),
            })
            .unwrap();
    }

    #[test]
    fn migration_requires_spare_connection_id() {
        let mut manager = manager();

        let result = manager.migrate(
            "10.0.0.2:4433".parse().unwrap(),
            [7; 8],
            Duration::from_millis(300),
            at(100),
        );
        assert_eq!(
            result.unwrap_err().code,
            transport::Error::NO_VIABLE_PATH.code
        );

        issue_cid(&mut manager, 1);
        let id = manager
            .migrate(
                "10.0.0.2:4433".parse().unwrap(),
                [7; 8],
                Duration::from_millis(300),
                at(100),
            )
            .unwrap();
        assert!(manager.get(id).unwrap().challenge.is_pending());
        assert!(!manager.get(id).unwrap().is_validated());
    }

    #[test]
    fn migration_disabled_by_peer() {
        let mut manager = manager();
        manager.on_transport_parameters(true, VarInt::from_u8(4), None, false);
        issue_cid(&mut manager, 1);

        assert!(manager
            .migrate(
                "10.0.0.2:4433".parse().unwrap(),
                [7; 8],
                Duration::from_millis(300),
                at(100),
            )
            .is_err());
    }

    #[test]
    fn validation_promotes_path() {
        let mut manager = manager();
        issue_cid(&mut manager, 1);

        let id = manager
            .migrate(
                "10.0.0.2:4433".parse().unwrap(),
                [0xab; 8],
                Duration::from_millis(300),
                at(100),
            )
            .unwrap();

        let challenges = manager.pending_challenges(at(100));
        assert_eq!(challenges.len(), 1);
        let (challenge_path, data) = challenges[0];
        assert_eq!(challenge_path, id);

        // a response with the wrong bytes is ignored
        assert!(!manager.on_path_response(id, &frame::PathResponse { data: [0; 8] }, 1472));

        assert!(manager.on_path_response(id, &frame::PathResponse { data }, 1472));
        assert_eq!(manager.active_id(), id);
        assert!(manager.get(id).unwrap().is_validated());
        assert!(manager
            .take_events()
            .iter()
            .any(|event| matches!(event, Event::PathValidated { .. })));
    }

    #[test]
    fn cid_limit_enforced() {
        let mut manager = manager();
        for sequence in 1..=3 {
            issue_cid(&mut manager, sequence);
        }
        let result = manager.on_new_connection_id(&frame::NewConnectionId {
            sequence_number: VarInt::from_u8(4),
            retire_prior_to: VarInt::ZERO,
            connection_id: ConnectionId::try_from(&[4u8; 8][..]).unwrap(),
            stateless_reset_token: stateless_reset::Token::new([4; 16]),
        });
        assert_eq!(result, Err(transport::Error::CONNECTION_ID_LIMIT_ERROR));
    }

    #[test]
    fn retire_prior_to_queues_retirements() {
        let mut manager = manager();
        issue_cid(&mut manager, 1);
        manager
            .on_new_connection_id(&frame::NewConnectionId {
                sequence_number: VarInt::from_u8(2),
                retire_prior_to: VarInt::from_u8(2),
                connection_id: ConnectionId::try_from(&[2u8; 8][..]).unwrap(),
                stateless_reset_token: stateless_reset::Token::new([2; 16]),
            })
            .unwrap();

        let mut retired = manager.take_retirements();
        retired.sort();
        assert_eq!(retired, [VarInt::ZERO, VarInt::from_u8(1)]);
    }

    #[test]
    fn equally_ranked_paths_alternate() {
        let mut manager = manager();
        manager.on_transport_parameters(false, VarInt::from_u8(4), None, true);
        issue_cid(&mut manager, 1);

        let second = manager
            .migrate(
                "10.0.0.2:4433".parse().unwrap(),
                [0xee; 8],
                Duration::from_millis(300),
                at(100),
            )
            .unwrap();
        let data = manager.pending_challenges(at(100))[0].1;
        manager.on_path_response(second, &frame::PathResponse { data }, 1472);

        // identical samples leave both paths tied on smoothed rtt
        for id in [path::Id::ZERO, second] {
            let path = manager.get_mut(id).unwrap();
            path.rtt_estimator.update_rtt(
                Duration::ZERO,
                Duration::from_millis(50),
                at(200),
                true,
                vesper_quic_core::packet::number::PacketNumberSpace::ApplicationData,
            );
            path.on_bytes_received(10_000);
        }
        assert!(manager.is_multipath_active());

        let picks: Vec<path::Id> = (0..4)
            .map(|_| manager.select_path(at(300), 1200).unwrap())
            .collect();
        assert_eq!(picks, [path::Id::ZERO, second, path::Id::ZERO, second]);
    }

    #[test]
    fn multipath_prefers_lower_rtt() {
        let mut manager = manager();
        manager.on_transport_parameters(false, VarInt::from_u8(4), None, true);
        issue_cid(&mut manager, 1);

        let second = manager
            .migrate(
                "10.0.0.2:4433".parse().unwrap(),
                [0xcd; 8],
                Duration::from_millis(300),
                at(100),
            )
            .unwrap();

        // validate the new path and give both paths rtt samples
        let data = manager.pending_challenges(at(100))[0].1;
        manager.on_path_response(second, &frame::PathResponse { data }, 1472);

        for (id, rtt_millis) in [(path::Id::ZERO, 80u64), (second, 20u64)] {
            let path = manager.get_mut(id).unwrap();
            path.rtt_estimator.update_rtt(
                Duration::ZERO,
                Duration::from_millis(rtt_millis),
                at(200),
                true,
                vesper_quic_core::packet::number::PacketNumberSpace::ApplicationData,
            );
            path.on_bytes_received(10_000);
        }

        assert!(manager.is_multipath_active());
        assert_eq!(manager.select_path(at(300), 1200), Some(second));

        // a suspect path is skipped
        for _ in 0..4 {
            manager.get_mut(second).unwrap().on_pto();
        }
        assert_eq!(manager.select_path(at(300), 1200), Some(path::Id::ZERO));
    }
}
