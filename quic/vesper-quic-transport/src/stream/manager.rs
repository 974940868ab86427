// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Owns every stream on a connection, the stream-count limits, and the
//! connection-level flow controllers.

use crate::{
    stream::{ReadOutcome, RecvStream, SendStream, SentRange, Transmission},
    sync::{RecvFlowController, SendFlowController},
};
use alloc::vec::Vec;
use bytes::Bytes;
use hashbrown::HashMap;
use vesper_quic_core::{
    application,
    connection::limits::Limits,
    endpoint,
    event::Event,
    frame,
    stream::{StreamId, StreamType},
    transport::{self, parameters::TransportParameters},
    varint::VarInt,
};

#[derive(Debug, Default)]
struct Entry {
    send: Option<SendStream>,
    recv: Option<RecvStream>,
}

impl Entry {
    fn is_finished(&self) -> bool {
        self.send.as_ref().is_none_or(SendStream::is_finished)
            && self.recv.as_ref().is_none_or(RecvStream::is_finished)
    }
}

/// Why a stream could not be opened right now
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenError {
    /// The peer's MAX_STREAMS limit is exhausted; retry after an update
    LimitReached,
    /// The handshake has not produced peer parameters yet
    NotReady,
}

#[derive(Debug)]
pub struct StreamManager {
    local: endpoint::Type,
    limits: Limits,

    entries: HashMap<StreamId, Entry>,

    /// Next ordinal to open locally, per type
    next_ordinal_bidi: u64,
    next_ordinal_uni: u64,

    /// The peer's cumulative open permissions for our streams
    peer_max_streams_bidi: VarInt,
    peer_max_streams_uni: VarInt,

    /// Our advertised permissions for peer-opened streams
    local_max_streams_bidi: VarInt,
    local_max_streams_uni: VarInt,
    /// Highest peer-opened ordinal + 1, per type
    peer_opened_bidi: u64,
    peer_opened_uni: u64,
    max_streams_update_pending: [bool; 2],

    /// Peer-granted send windows per stream class
    peer_params: Option<PeerStreamLimits>,

    /// Connection-level flow
    pub send_flow: SendFlowController,
    pub recv_flow: RecvFlowController,

    /// Round-robin position for fair transmission
    transmit_cursor: usize,

    /// STREAMS_BLOCKED signals owed, per type
    streams_blocked_pending: [Option<VarInt>; 2],

    events: Vec<Event>,
}

#[derive(Clone, Copy, Debug)]
struct PeerStreamLimits {
    bidi_local: VarInt,
    bidi_remote: VarInt,
    uni: VarInt,
}

impl StreamManager {
    pub fn new(local: endpoint::Type, limits: &Limits) -> Self {
        Self {
            local,
            limits: *limits,
            entries: HashMap::new(),
            next_ordinal_bidi: 0,
            next_ordinal_uni: 0,
            peer_max_streams_bidi: VarInt::ZERO,
            peer_max_streams_uni: VarInt::ZERO,
            local_max_streams_bidi: limits.initial_max_streams_bidi(),
            local_max_streams_uni: limits.initial_max_streams_uni(),
            peer_opened_bidi: 0,
            peer_opened_uni: 0,
            max_streams_update_pending: [false; 2],
            peer_params: None,
            send_flow: SendFlowController::new(VarInt::ZERO),
            recv_flow: RecvFlowController::new(limits.initial_max_data()),
            transmit_cursor: 0,
            streams_blocked_pending: [None; 2],
            events: Vec::new(),
        }
    }

    /// Applies the peer's transport parameters once the handshake
    /// produces them
    pub fn on_transport_parameters(&mut self, params: &TransportParameters) {
        self.peer_max_streams_bidi = params.initial_max_streams_bidi;
        self.peer_max_streams_uni = params.initial_max_streams_uni;
        self.send_flow.on_max_data(params.initial_max_data);
        self.peer_params = Some(PeerStreamLimits {
            bidi_local: params.initial_max_stream_data_bidi_local,
            bidi_remote: params.initial_max_stream_data_bidi_remote,
            uni: params.initial_max_stream_data_uni,
        });
    }

    /// Drains events produced since the last call
    pub fn take_events(&mut self) -> Vec<Event> {
        core::mem::take(&mut self.events)
    }

    /// Opens a locally initiated stream
    pub fn open(&mut self, stream_type: StreamType) -> Result<StreamId, OpenError> {
        let Some(peer) = self.peer_params else {
            return Err(OpenError::NotReady);
        };

        let (ordinal, peer_limit) = match stream_type {
            StreamType::Bidirectional => (&mut self.next_ordinal_bidi, self.peer_max_streams_bidi),
            StreamType::Unidirectional => (&mut self.next_ordinal_uni, self.peer_max_streams_uni),
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint that is unable to open a new stream due to the peer's
        //# limits SHOULD send a STREAMS_BLOCKED frame
        if *ordinal >= peer_limit.as_u64() {
            let index = type_index(stream_type);
            self.streams_blocked_pending[index] = Some(peer_limit);
            return Err(OpenError::LimitReached);
        }

        let id = StreamId::nth(self.local, stream_type, *ordinal)
            .ok_or(OpenError::LimitReached)?;
        *ordinal += 1;

        let send_window = match stream_type {
            // our bidi stream's send half is governed by the peer's
            // "remote" window, since the peer is the remote end of it
            StreamType::Bidirectional => peer.bidi_remote,
            StreamType::Unidirectional => peer.uni,
        };

        let mut entry = Entry::default();
        entry.send = Some(SendStream::new(id, send_window));
        if stream_type.is_bidirectional() {
            entry.recv = Some(RecvStream::new(
                id,
                self.limits.initial_max_stream_data_bidi_local(),
            ));
        }
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Opens peer-initiated streams up to and including `id`
    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
    //# A STREAM frame or
    //# RESET_STREAM frame for a higher-numbered stream implicitly creates
    //# all lower-numbered streams of the same type.
    fn open_peer_streams_through(&mut self, id: StreamId) -> Result<(), transport::Error> {
        let stream_type = id.stream_type();
        let advertised = match stream_type {
            StreamType::Bidirectional => self.local_max_streams_bidi,
            StreamType::Unidirectional => self.local_max_streams_uni,
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint MUST treat receipt of a frame that permits creation
        //# of a stream exceeding this limit as a connection error of type
        //# STREAM_LIMIT_ERROR
        if id.ordinal() >= advertised.as_u64() {
            return Err(transport::Error::STREAM_LIMIT_ERROR);
        }

        let peer = self.peer_params;
        loop {
            let opened = match stream_type {
                StreamType::Bidirectional => self.peer_opened_bidi,
                StreamType::Unidirectional => self.peer_opened_uni,
            };
            if opened > id.ordinal() {
                break;
            }

            let opened_id = StreamId::nth(self.local.peer_type(), stream_type, opened)
                .ok_or(transport::Error::STREAM_LIMIT_ERROR)?;
            match stream_type {
                StreamType::Bidirectional => self.peer_opened_bidi += 1,
                StreamType::Unidirectional => self.peer_opened_uni += 1,
            }

            let mut entry = Entry::default();
            entry.recv = Some(RecvStream::new(
                opened_id,
                match stream_type {
                    StreamType::Bidirectional => {
                        self.limits.initial_max_stream_data_bidi_remote()
                    }
                    StreamType::Unidirectional => self.limits.initial_max_stream_data_uni(),
                },
            ));
            if stream_type.is_bidirectional() {
                entry.send = Some(SendStream::new(
                    opened_id,
                    peer.map_or(VarInt::ZERO, |peer| peer.bidi_local),
                ));
            }
            self.entries.insert(opened_id, entry);
            self.events.push(Event::StreamOpened { id: opened_id });
        }
        Ok(())
    }

    fn recv_half(&mut self, id: StreamId) -> Result<&mut RecvStream, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
        //# An endpoint MUST terminate the connection with error
        //# STREAM_STATE_ERROR if it receives a STREAM frame for a locally
        //# initiated stream that has not yet been created, or for a send-
        //# only stream.
        if !id.is_receivable(self.local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("data on a send-only stream"));
        }

        if id.initiator() != self.local && !self.entries.contains_key(&id) {
            self.open_peer_streams_through(id)?;
        }

        self.entries
            .get_mut(&id)
            .and_then(|entry| entry.recv.as_mut())
            .ok_or(
                transport::Error::STREAM_STATE_ERROR
                    .with_reason("frame for an uncreated local stream"),
            )
    }

    fn send_half(&mut self, id: StreamId) -> Result<&mut SendStream, transport::Error> {
        if !id.is_sendable(self.local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("peer frame for a receive-only stream"));
        }
        if id.initiator() != self.local && !self.entries.contains_key(&id) {
            self.open_peer_streams_through(id)?;
        }
        self.entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
            .ok_or(
                transport::Error::STREAM_STATE_ERROR
                    .with_reason("frame for an uncreated local stream"),
            )
    }

    /// Dispatches a STREAM frame
    pub fn on_stream_frame(&mut self, frame: &frame::Stream) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        let newly_received = {
            let stream = self.recv_half(id)?;
            stream.on_stream_frame(frame)?
        };
        self.recv_flow.on_data_received_incremental(newly_received)?;
        self.reap(id);
        Ok(())
    }

    /// Dispatches a RESET_STREAM frame
    pub fn on_reset_stream_frame(
        &mut self,
        frame: &frame::ResetStream,
    ) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        let newly_received = {
            let stream = self.recv_half(id)?;
            stream.on_reset_frame(frame)?
        };
        self.recv_flow.on_data_received_incremental(newly_received)?;
        self.events.push(Event::StreamReset {
            id,
            error: application::Error::new(frame.application_error_code),
        });
        Ok(())
    }

    /// Dispatches a STOP_SENDING frame
    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.5
    //# An endpoint that receives a STOP_SENDING frame MUST send a
    //# RESET_STREAM frame if the stream is in the "Ready" or "Send" state.
    pub fn on_stop_sending_frame(
        &mut self,
        frame: &frame::StopSending,
    ) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        let error = application::Error::new(frame.application_error_code);
        let stream = self.send_half(id)?;
        stream.reset(error)?;
        Ok(())
    }

    pub fn on_max_stream_data_frame(
        &mut self,
        frame: &frame::MaxStreamData,
    ) -> Result<(), transport::Error> {
        let id = StreamId::from_varint(frame.stream_id);
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
        //# Receiving a MAX_STREAM_DATA frame for a locally
        //# initiated stream that has not yet been created MUST be treated as
        //# a connection error of type STREAM_STATE_ERROR.
        let stream = self.send_half(id)?;
        stream.flow.on_max_data(frame.maximum_stream_data);
        Ok(())
    }

    pub fn on_max_streams_frame(&mut self, frame: &frame::MaxStreams) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.11
        //# MAX_STREAMS frames that do not increase the stream limit MUST be
        //# ignored.
        match frame.stream_type {
            StreamType::Bidirectional => {
                self.peer_max_streams_bidi =
                    self.peer_max_streams_bidi.max(frame.maximum_streams);
            }
            StreamType::Unidirectional => {
                self.peer_max_streams_uni = self.peer_max_streams_uni.max(frame.maximum_streams);
            }
        }
    }

    pub fn on_max_data_frame(&mut self, frame: &frame::MaxData) {
        self.send_flow.on_max_data(frame.maximum_data);
    }

    /// Application write entry point
    pub fn write(
        &mut self,
        id: StreamId,
        data: Bytes,
        fin: bool,
    ) -> Result<(), transport::Error> {
        let stream = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
            .ok_or(transport::Error::STREAM_STATE_ERROR.with_reason("unknown stream"))?;
        stream.write(data, fin)
    }

    /// Application read entry point
    pub fn read(&mut self, id: StreamId, max: usize) -> Result<ReadOutcome, transport::Error> {
        let outcome = {
            let stream = self
                .entries
                .get_mut(&id)
                .and_then(|entry| entry.recv.as_mut())
                .ok_or(transport::Error::STREAM_STATE_ERROR.with_reason("unknown stream"))?;
            stream.read(max)
        };
        if let ReadOutcome::Data { data, .. } = &outcome {
            self.recv_flow.on_data_consumed(data.len());
        }
        self.reap(id);
        Ok(outcome)
    }

    /// Application-initiated abrupt close of the send half
    pub fn reset(&mut self, id: StreamId, error: application::Error) -> Result<(), transport::Error> {
        let stream = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
            .ok_or(transport::Error::STREAM_STATE_ERROR.with_reason("unknown stream"))?;
        stream.reset(error)
    }

    /// Application requests the peer stop sending on `id`
    pub fn stop_sending(
        &mut self,
        id: StreamId,
        error: application::Error,
    ) -> Result<(), transport::Error> {
        let stream = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.recv.as_mut())
            .ok_or(transport::Error::STREAM_STATE_ERROR.with_reason("unknown stream"))?;
        stream.stop_sending(error);
        Ok(())
    }

    /// Removes a fully terminated stream and reports it closed
    fn reap(&mut self, id: StreamId) {
        if self
            .entries
            .get(&id)
            .is_some_and(Entry::is_finished)
        {
            self.entries.remove(&id);
            self.events.push(Event::StreamClosed { id });

            // a consumed peer-opened stream frees a slot in our limit
            if id.initiator() != self.local {
                let index = type_index(id.stream_type());
                match id.stream_type() {
                    StreamType::Bidirectional => {
                        self.local_max_streams_bidi =
                            self.local_max_streams_bidi.saturating_add(VarInt::from_u8(1));
                    }
                    StreamType::Unidirectional => {
                        self.local_max_streams_uni =
                            self.local_max_streams_uni.saturating_add(VarInt::from_u8(1));
                    }
                }
                self.max_streams_update_pending[index] = true;
            }
        }
    }

    /// Acknowledgment of a previously sent stream range
    pub fn on_range_acked(&mut self, id: StreamId, range: SentRange) {
        if let Some(stream) = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
        {
            stream.on_range_acked(range);
        }
        self.reap(id);
    }

    /// Loss of a previously sent stream range
    pub fn on_range_lost(&mut self, id: StreamId, range: SentRange) {
        if let Some(stream) = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
        {
            stream.on_range_lost(range);
        }
    }

    pub fn on_reset_acked(&mut self, id: StreamId) {
        if let Some(stream) = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
        {
            stream.on_reset_acked();
        }
        self.reap(id);
    }

    pub fn on_reset_lost(&mut self, id: StreamId, error: application::Error, final_size: VarInt) {
        if let Some(stream) = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.send.as_mut())
        {
            stream.on_reset_lost(error, final_size);
        }
    }

    pub fn on_stop_sending_lost(&mut self, id: StreamId) {
        if let Some(stream) = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.recv.as_mut())
        {
            stream.on_stop_sending_lost();
        }
    }

    pub fn on_max_stream_data_lost(&mut self, id: StreamId) {
        if let Some(stream) = self
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.recv.as_mut())
        {
            stream.flow.retransmit_credit_update();
        }
    }

    /// Returns true if any stream control frame is owed to the peer
    pub fn has_control_interest(&self) -> bool {
        self.streams_blocked_pending.iter().any(Option::is_some)
            || self.max_streams_update_pending.iter().any(|pending| *pending)
            || self.recv_flow.has_credit_update()
            || self.send_flow.has_blocked_signal()
            || self.entries.values().any(|entry| {
                entry.send.as_ref().is_some_and(|send| {
                    send.has_pending_reset() || send.flow.has_blocked_signal()
                }) || entry.recv.as_ref().is_some_and(|recv| {
                    recv.has_pending_stop_sending() || recv.has_credit_update()
                })
            })
    }

    /// Returns true if any stream has data or control frames to send
    pub fn has_transmission_interest(&self) -> bool {
        self.has_control_interest()
            || self.entries.values().any(|entry| {
                entry
                    .send
                    .as_ref()
                    .is_some_and(|send| send.has_transmission_interest())
            })
    }

    /// Produces the next stream data transmission within `max_len` and
    /// the connection send window, rotating fairly among ready streams
    pub fn next_transmission(&mut self, max_len: usize) -> Option<Transmission> {
        let connection_credit = self.send_flow.available();

        let mut ready: Vec<StreamId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .send
                    .as_ref()
                    .is_some_and(|send| send.has_transmission_interest())
            })
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            return None;
        }
        ready.sort_by_key(|id| {
            let priority = self
                .entries
                .get(id)
                .and_then(|entry| entry.send.as_ref())
                .map(|send| send.priority)
                .unwrap_or(u8::MAX);
            (priority, id.as_varint())
        });

        let start = self.transmit_cursor % ready.len();
        for index in 0..ready.len() {
            let id = ready[(start + index) % ready.len()];
            let send = self
                .entries
                .get_mut(&id)
                .and_then(|entry| entry.send.as_mut())?;

            if connection_credit == 0 && !send.has_retransmit_interest() {
                // record the connection-level block for a DATA_BLOCKED
                // signal; no stream can make progress on new data
                let _ = self.send_flow.acquire(1);
                continue;
            }

            if let Some(transmission) = send.next_transmission(max_len, connection_credit) {
                if transmission.fresh {
                    let consumed = self.send_flow.acquire(transmission.data.len());
                    debug_assert_eq!(consumed, transmission.data.len());
                }
                self.transmit_cursor = self.transmit_cursor.wrapping_add(index + 1);
                return Some(transmission);
            }
        }
        None
    }

    /// Collects pending control frame payloads: resets, stop-sendings,
    /// credit updates, blocked signals
    pub fn pending_control_frames(&mut self) -> Vec<ControlFrame> {
        let mut frames = Vec::new();

        for (id, entry) in self.entries.iter_mut() {
            if let Some(send) = entry.send.as_mut() {
                if let Some((error, final_size)) = send.take_pending_reset() {
                    frames.push(ControlFrame::ResetStream {
                        id: *id,
                        error,
                        final_size,
                    });
                }
                if let Some(limit) = send.flow.take_blocked_signal() {
                    frames.push(ControlFrame::StreamDataBlocked { id: *id, limit });
                }
            }
            if let Some(recv) = entry.recv.as_mut() {
                if let Some(error) = recv.take_pending_stop_sending() {
                    frames.push(ControlFrame::StopSending { id: *id, error });
                }
                if let Some(limit) = recv.take_credit_update() {
                    frames.push(ControlFrame::MaxStreamData { id: *id, limit });
                }
            }
        }

        if let Some(limit) = self.recv_flow.take_credit_update() {
            frames.push(ControlFrame::MaxData { limit });
        }
        if let Some(limit) = self.send_flow.take_blocked_signal() {
            frames.push(ControlFrame::DataBlocked { limit });
        }

        for stream_type in [StreamType::Bidirectional, StreamType::Unidirectional] {
            let index = type_index(stream_type);
            if core::mem::take(&mut self.max_streams_update_pending[index]) {
                let limit = match stream_type {
                    StreamType::Bidirectional => self.local_max_streams_bidi,
                    StreamType::Unidirectional => self.local_max_streams_uni,
                };
                frames.push(ControlFrame::MaxStreams { stream_type, limit });
            }
            if let Some(limit) = self.streams_blocked_pending[index].take() {
                frames.push(ControlFrame::StreamsBlocked { stream_type, limit });
            }
        }

        frames
    }

    /// Bytes buffered and unacknowledged on a stream's send half
    pub fn buffered_len(&self, id: StreamId) -> u64 {
        self.entries
            .get(&id)
            .and_then(|entry| entry.send.as_ref())
            .map_or(0, SendStream::buffered_len)
    }

    /// True when a read on `id` can make progress
    pub fn is_readable(&self, id: StreamId) -> bool {
        self.entries
            .get(&id)
            .and_then(|entry| entry.recv.as_ref())
            .is_some_and(RecvStream::has_readable_data)
    }

    pub fn open_stream_count(&self) -> usize {
        self.entries.len()
    }

    /// Resolves pending reads/writes when the connection dies
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.entries.keys().copied().collect()
    }
}

#[inline]
fn type_index(stream_type: StreamType) -> usize {
    match stream_type {
        StreamType::Bidirectional => 0,
        StreamType::Unidirectional => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> StreamManager {
        let limits = Limits::default();
        let mut manager = StreamManager::new(endpoint::Type::Client, &limits);
        let peer = TransportParameters {
            initial_max_data: VarInt::from_u32(100_000),
            initial_max_stream_data_bidi_local: VarInt::from_u32(10_000),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(10_000),
            initial_max_stream_data_uni: VarInt::from_u32(10_000),
            initial_max_streams_bidi: VarInt::from_u8(2),
            initial_max_streams_uni: VarInt::from_u8(1),
            ..TransportParameters::default()
        };
        manager.on_transport_parameters(&peer);
        manager
    }

    fn stream_frame(id: u64, offset: u64, data: &'static [u8], fin: bool) -> frame::Stream<'static> {
        frame::Stream {
            stream_id: VarInt::new(id).unwrap(),
            offset: VarInt::new(offset).unwrap(),
            is_fin: fin,
            is_last_frame: false,
            data,
        }
    }

    #[test]
    fn open_respects_peer_stream_limits() {
        let mut manager = manager();
        let first = manager.open(StreamType::Bidirectional).unwrap();
        let second = manager.open(StreamType::Bidirectional).unwrap();
        assert_eq!(first.as_varint(), 0u64);
        assert_eq!(second.as_varint(), 4u64);

        assert_eq!(
            manager.open(StreamType::Bidirectional),
            Err(OpenError::LimitReached)
        );
        // the failed open leaves a STREAMS_BLOCKED signal behind
        let frames = manager.pending_control_frames();
        assert!(frames.iter().any(|frame| matches!(
            frame,
            ControlFrame::StreamsBlocked {
                stream_type: StreamType::Bidirectional,
                ..
            }
        )));

        // a MAX_STREAMS update unlocks the next ordinal
        manager.on_max_streams_frame(&frame::MaxStreams {
            stream_type: StreamType::Bidirectional,
            maximum_streams: VarInt::from_u8(3),
        });
        assert!(manager.open(StreamType::Bidirectional).is_ok());
    }

    #[test]
    fn open_before_handshake_is_not_ready() {
        let limits = Limits::default();
        let mut manager = StreamManager::new(endpoint::Type::Client, &limits);
        assert_eq!(
            manager.open(StreamType::Bidirectional),
            Err(OpenError::NotReady)
        );
    }

    #[test]
    fn peer_stream_implicitly_opens_lower_ordinals() {
        let mut manager = manager();
        // server-initiated bidi stream id 9 is ordinal 2; ordinals 0..=2 open
        manager
            .on_stream_frame(&stream_frame(9, 0, b"hi", false))
            .unwrap();
        let events = manager.take_events();
        let opened = events
            .iter()
            .filter(|event| matches!(event, Event::StreamOpened { .. }))
            .count();
        assert_eq!(opened, 3);
        assert_eq!(manager.open_stream_count(), 3);
    }

    #[test]
    fn peer_stream_limit_enforced() {
        let mut manager = manager();
        // our default advertised limit is 100 per type; ordinal 100 violates
        let id = StreamId::nth(
            endpoint::Type::Server,
            StreamType::Unidirectional,
            100,
        )
        .unwrap();
        let result = manager.on_stream_frame(&frame::Stream {
            stream_id: id.as_varint(),
            offset: VarInt::ZERO,
            is_fin: false,
            is_last_frame: false,
            data: b"x",
        });
        assert_eq!(result, Err(transport::Error::STREAM_LIMIT_ERROR));
    }

    #[test]
    fn data_on_send_only_stream_rejected() {
        let mut manager = manager();
        let id = manager.open(StreamType::Unidirectional).unwrap();
        let result = manager.on_stream_frame(&frame::Stream {
            stream_id: id.as_varint(),
            offset: VarInt::ZERO,
            is_fin: false,
            is_last_frame: false,
            data: b"x",
        });
        assert_eq!(
            result.unwrap_err().code,
            transport::Error::STREAM_STATE_ERROR.code
        );
    }

    #[test]
    fn write_read_round_trip_through_manager() {
        let mut manager = manager();
        let id = manager.open(StreamType::Bidirectional).unwrap();
        manager
            .write(id, Bytes::from_static(b"ping"), true)
            .unwrap();

        let tx = manager.next_transmission(1200).unwrap();
        assert_eq!(tx.id, id);
        assert_eq!(tx.data.as_ref(), b"ping");
        assert!(tx.fin);
        // fresh data consumed connection credit
        assert_eq!(manager.send_flow.consumed(), 4u64);
    }

    #[test]
    fn connection_window_blocks_all_streams() {
        let limits = Limits::default();
        let mut manager = StreamManager::new(endpoint::Type::Client, &limits);
        manager.on_transport_parameters(&TransportParameters {
            initial_max_data: VarInt::from_u8(4),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(10_000),
            initial_max_streams_bidi: VarInt::from_u8(4),
            ..TransportParameters::default()
        });

        let id = manager.open(StreamType::Bidirectional).unwrap();
        manager
            .write(id, Bytes::from_static(b"exceeds window"), false)
            .unwrap();

        let tx = manager.next_transmission(1200).unwrap();
        assert_eq!(tx.data.len(), 4);

        // credit exhausted: nothing further, and DATA_BLOCKED is owed
        assert!(manager.next_transmission(1200).is_none());
        let frames = manager.pending_control_frames();
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ControlFrame::DataBlocked { .. })));
    }

    #[test]
    fn stop_sending_resets_send_half() {
        let mut manager = manager();
        let id = manager.open(StreamType::Unidirectional).unwrap();
        manager.write(id, Bytes::from_static(b"data"), false).unwrap();

        manager
            .on_stop_sending_frame(&frame::StopSending {
                stream_id: id.as_varint(),
                application_error_code: VarInt::from_u8(9),
            })
            .unwrap();

        let frames = manager.pending_control_frames();
        assert!(frames.iter().any(|frame| matches!(
            frame,
            ControlFrame::ResetStream { error, .. } if error.as_u64() == 9
        )));
    }

    #[test]
    fn finished_streams_are_reaped_and_limits_refreshed() {
        let mut manager = manager();
        // server uni stream 3, delivered and read to completion
        manager
            .on_stream_frame(&stream_frame(3, 0, b"done", true))
            .unwrap();
        manager.take_events();

        match manager.read(StreamId::from_varint(VarInt::from_u8(3)), 100).unwrap() {
            ReadOutcome::Data { data, fin } => {
                assert_eq!(data.as_slice(), b"done");
                assert!(fin);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(manager.open_stream_count(), 0);
        let events = manager.take_events();
        assert!(events
            .iter()
            .any(|event| matches!(event, Event::StreamClosed { .. })));

        // the freed slot triggers a MAX_STREAMS refresh
        let frames = manager.pending_control_frames();
        assert!(frames.iter().any(|frame| matches!(
            frame,
            ControlFrame::MaxStreams {
                stream_type: StreamType::Unidirectional,
                ..
            }
        )));
    }
}

/// A stream-related control frame owed to the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    ResetStream {
        id: StreamId,
        error: application::Error,
        final_size: VarInt,
    },
    StopSending {
        id: StreamId,
        error: application::Error,
    },
    MaxStreamData {
        id: StreamId,
        limit: VarInt,
    },
    MaxData {
        limit: VarInt,
    },
    StreamDataBlocked {
        id: StreamId,
        limit: VarInt,
    },
    DataBlocked {
        limit: VarInt,
    },
    MaxStreams {
        stream_type: StreamType,
        limit: VarInt,
    },
    StreamsBlocked {
        stream_type: StreamType,
        limit: VarInt,
    },
}
