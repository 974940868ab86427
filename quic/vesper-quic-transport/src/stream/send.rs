// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The sending half of a stream: write buffering, flow-credit clipping,
//! and loss-driven retransmission.

use crate::sync::SendFlowController;
use alloc::collections::VecDeque;
use bytes::Bytes;
use vesper_quic_core::{
    application,
    interval_set::{Interval, IntervalSet},
    stream::{SendState, StreamId},
    transport,
    varint::VarInt,
};

/// A contiguous range of stream bytes carried by one packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentRange {
    pub offset: u64,
    pub len: u64,
    pub fin: bool,
}

/// One transmission's worth of stream data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transmission {
    pub id: StreamId,
    pub offset: u64,
    pub data: Bytes,
    pub fin: bool,
    /// False for retransmissions, which consume no connection credit
    pub fresh: bool,
}

#[derive(Debug)]
pub struct SendStream {
    pub id: StreamId,
    pub state: SendState,
    pub flow: SendFlowController,
    /// Scheduling weight; lower values transmit first
    pub priority: u8,

    /// Unacknowledged chunks in offset order; the front starts at
    /// `buffer_offset`
    buffer: VecDeque<Bytes>,
    buffer_offset: u64,
    /// End of all buffered data
    enqueued_offset: u64,
    /// First byte never transmitted
    send_offset: u64,

    acked: IntervalSet,
    /// Lost ranges owed a retransmission
    pending_retransmit: IntervalSet,

    fin_queued: bool,
    /// The fin is (re)transmittable
    fin_pending: bool,
    fin_acked: bool,

    /// A RESET_STREAM owed to the peer (error, final size)
    reset_pending: Option<(application::Error, VarInt)>,
    reset_acked: bool,
}

impl SendStream {
    pub fn new(id: StreamId, initial_max_stream_data: VarInt) -> Self {
        Self {
            id,
            state: SendState::default(),
            flow: SendFlowController::new(initial_max_stream_data),
            priority: 127,
            buffer: VecDeque::new(),
            buffer_offset: 0,
            enqueued_offset: 0,
            send_offset: 0,
            acked: IntervalSet::new(),
            pending_retransmit: IntervalSet::new(),
            fin_queued: false,
            fin_pending: false,
            fin_acked: false,
            reset_pending: None,
            reset_acked: false,
        }
    }

    /// Bytes buffered and not yet fully acknowledged
    #[inline]
    pub fn buffered_len(&self) -> u64 {
        self.enqueued_offset - self.buffer_offset
    }

    /// Accepts application data for transmission
    pub fn write(&mut self, data: Bytes, fin: bool) -> Result<(), transport::Error> {
        if self.fin_queued || self.state.is_reset() {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("write after fin or reset"));
        }

        self.enqueued_offset += data.len() as u64;
        if !data.is_empty() {
            self.buffer.push_back(data);
        }
        if fin {
            self.fin_queued = true;
            self.fin_pending = true;
        }
        Ok(())
    }

    /// Returns true if the stream has anything to put on the wire
    pub fn has_transmission_interest(&self) -> bool {
        if self.reset_pending.is_some() {
            return true;
        }
        if self.state.is_reset() {
            return false;
        }
        !self.pending_retransmit.is_empty()
            || (self.send_offset < self.enqueued_offset && self.flow.available() > 0)
            || self.fin_pending
    }

    /// Returns true if a retransmission or bare fin is owed, which
    /// consume no connection credit
    #[inline]
    pub fn has_retransmit_interest(&self) -> bool {
        !self.pending_retransmit.is_empty()
            || (self.fin_pending && self.send_offset == self.enqueued_offset)
    }

    /// Returns true if a RESET_STREAM is owed
    #[inline]
    pub fn has_pending_reset(&self) -> bool {
        self.reset_pending.is_some()
    }

    /// Produces the next chunk to transmit, at most `max_len` bytes.
    ///
    /// Retransmissions take precedence over new data. New data is
    /// clipped to the stream's flow credit and `connection_credit`; the
    /// caller charges `data.len()` against the connection window when
    /// `fresh` is set.
    pub fn next_transmission(
        &mut self,
        max_len: usize,
        connection_credit: u64,
    ) -> Option<Transmission> {
        if self.state.is_reset() || max_len == 0 {
            return None;
        }

        // lost ranges first; retransmission does not move the state machine
        let first = self.pending_retransmit.iter().next();
        if let Some(range) = first {
            let start = range.start;
            let len = range.len().min(max_len as u64);
            let data = self.copy_range(start, len);
            self.pending_retransmit.remove_until(start + len);
            let fin = self.fin_at(start + len);
            return Some(Transmission {
                id: self.id,
                offset: start,
                data,
                fin,
                fresh: false,
            });
        }

        // then new data within the stream's and the connection's credit
        let unsent = self.enqueued_offset - self.send_offset;
        if unsent > 0 {
            let budget = unsent.min(max_len as u64).min(connection_credit);
            let len = self.flow.acquire(budget as usize) as u64;
            if len > 0 {
                let offset = self.send_offset;
                let data = self.copy_range(offset, len);
                self.send_offset += len;
                let fin = self.fin_at(self.send_offset);
                self.state.on_send().ok()?;
                if fin {
                    self.fin_pending = false;
                    self.state.on_fin_sent().ok()?;
                }
                return Some(Transmission {
                    id: self.id,
                    offset,
                    data,
                    fin,
                    fresh: true,
                });
            }
            return None;
        }

        // a bare fin (empty stream or fin after all data was sent)
        if self.fin_pending && self.send_offset == self.enqueued_offset {
            self.fin_pending = false;
            self.state.on_fin_sent().ok()?;
            return Some(Transmission {
                id: self.id,
                offset: self.send_offset,
                data: Bytes::new(),
                fin: true,
                fresh: false,
            });
        }

        None
    }

    /// Whether a transmission ending at `end` carries the fin
    #[inline]
    fn fin_at(&self, end: u64) -> bool {
        self.fin_queued && end == self.enqueued_offset
    }

    /// Copies `len` bytes starting at `offset` out of the buffer
    fn copy_range(&self, offset: u64, len: u64) -> Bytes {
        debug_assert!(offset >= self.buffer_offset);
        let mut skip = offset - self.buffer_offset;
        let mut remaining = len as usize;
        let mut out = bytes::BytesMut::with_capacity(remaining);

        for chunk in &self.buffer {
            if skip >= chunk.len() as u64 {
                skip -= chunk.len() as u64;
                continue;
            }
            let start = skip as usize;
            skip = 0;
            let take = remaining.min(chunk.len() - start);
            out.extend_from_slice(&chunk[start..start + take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }

        debug_assert_eq!(remaining, 0, "transmission range exceeded buffered data");
        out.freeze()
    }

    /// Acknowledges a previously transmitted range.
    ///
    /// Returns true when the stream became fully acknowledged.
    pub fn on_range_acked(&mut self, range: SentRange) -> bool {
        if range.len > 0 {
            self.acked
                .insert(Interval::new(range.offset, range.offset + range.len - 1));
        }
        if range.fin {
            self.fin_acked = true;
        }
        self.pending_retransmit.remove_until(self.contiguous_acked());
        self.release_acked_prefix();

        if self.fin_acked
            && self.fin_queued
            && self.contiguous_acked() == self.enqueued_offset
        {
            return self.state.on_all_data_acked();
        }
        false
    }

    /// A packet carrying this range was declared lost
    pub fn on_range_lost(&mut self, range: SentRange) {
        if self.state.is_reset() {
            return;
        }
        if range.len > 0 {
            let interval = Interval::new(range.offset, range.offset + range.len - 1);
            // skip anything that was acknowledged through another packet
            if !(self.acked.contains(interval.start) && self.acked.contains(interval.end)) {
                self.pending_retransmit.insert(interval);
                // bytes below the released prefix are no longer buffered
                // and need no retransmission
                self.pending_retransmit.remove_until(self.contiguous_acked());
            }
        }
        if range.fin && !self.fin_acked {
            self.fin_pending = true;
        }
    }

    /// End of the contiguous acknowledged prefix
    fn contiguous_acked(&self) -> u64 {
        let mut end = 0;
        for interval in self.acked.iter() {
            if interval.start > end {
                break;
            }
            end = end.max(interval.end + 1);
        }
        end
    }

    /// Frees buffered chunks fully covered by the acked prefix
    fn release_acked_prefix(&mut self) {
        let prefix = self.contiguous_acked();
        while let Some(front) = self.buffer.front() {
            let front_end = self.buffer_offset + front.len() as u64;
            if front_end <= prefix {
                self.buffer_offset = front_end;
                self.buffer.pop_front();
            } else {
                break;
            }
        }
    }

    /// The application (or a STOP_SENDING request) aborts the stream
    pub fn reset(&mut self, error: application::Error) -> Result<(), transport::Error> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.state.on_reset()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# An endpoint that is resetting a stream ... defines that final size
        //# as the "Final Size" field of a RESET_STREAM frame.
        let final_size = VarInt::new(self.send_offset).unwrap_or(VarInt::MAX);
        self.reset_pending = Some((error, final_size));

        self.buffer.clear();
        self.buffer_offset = self.send_offset;
        self.enqueued_offset = self.send_offset;
        self.pending_retransmit.clear();
        self.fin_pending = false;
        Ok(())
    }

    /// Takes the RESET_STREAM payload owed to the peer
    pub fn take_pending_reset(&mut self) -> Option<(application::Error, VarInt)> {
        self.reset_pending.take()
    }

    /// The RESET_STREAM frame was acknowledged
    pub fn on_reset_acked(&mut self) {
        self.reset_acked = true;
        self.state.on_reset_acked();
    }

    /// A lost RESET_STREAM must be retransmitted
    pub fn on_reset_lost(&mut self, error: application::Error, final_size: VarInt) {
        if !self.reset_acked {
            self.reset_pending = Some((error, final_size));
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_quic_core::{endpoint, stream::StreamType};

    fn stream() -> SendStream {
        let id = StreamId::initial(endpoint::Type::Client, StreamType::Bidirectional);
        SendStream::new(id, VarInt::from_u32(1000))
    }

    #[test]
    fn write_then_transmit_then_ack() {
        let mut stream = stream();
        stream.write(Bytes::from_static(b"hello world"), true).unwrap();
        assert!(stream.has_transmission_interest());

        let tx = stream.next_transmission(1200, u64::MAX).unwrap();
        assert_eq!(tx.offset, 0);
        assert_eq!(tx.data.as_ref(), b"hello world");
        assert!(tx.fin);
        assert!(!stream.has_transmission_interest());
        assert_eq!(stream.state, SendState::DataSent);

        let done = stream.on_range_acked(SentRange {
            offset: 0,
            len: 11,
            fin: true,
        });
        assert!(done);
        assert_eq!(stream.state, SendState::DataRecvd);
        assert_eq!(stream.buffered_len(), 0);
    }

    #[test]
    fn transmission_respects_max_len() {
        let mut stream = stream();
        stream.write(Bytes::from_static(&[7; 100]), false).unwrap();

        let first = stream.next_transmission(60, u64::MAX).unwrap();
        assert_eq!(first.data.len(), 60);
        assert!(!first.fin);

        let second = stream.next_transmission(60, u64::MAX).unwrap();
        assert_eq!(second.offset, 60);
        assert_eq!(second.data.len(), 40);
    }

    #[test]
    fn flow_credit_clips_and_signals() {
        let mut stream = stream();
        stream.write(Bytes::from_static(&[1; 2000]), false).unwrap();

        let tx = stream.next_transmission(4000, u64::MAX).unwrap();
        assert_eq!(tx.data.len(), 1000);
        assert_eq!(stream.flow.take_blocked_signal(), Some(VarInt::from_u32(1000)));

        // no credit left: nothing more to send
        assert!(stream.next_transmission(4000, u64::MAX).is_none());

        stream.flow.on_max_data(VarInt::from_u32(2000));
        let tx = stream.next_transmission(4000, u64::MAX).unwrap();
        assert_eq!(tx.offset, 1000);
        assert_eq!(tx.data.len(), 1000);
    }

    #[test]
    fn loss_triggers_retransmission_of_same_bytes() {
        let mut stream = stream();
        stream.write(Bytes::from_static(b"abcdefghij"), true).unwrap();

        let tx = stream.next_transmission(4, u64::MAX).unwrap();
        let lost = SentRange {
            offset: tx.offset,
            len: tx.data.len() as u64,
            fin: tx.fin,
        };
        let _rest = stream.next_transmission(100, u64::MAX).unwrap();

        stream.on_range_lost(lost);
        let retx = stream.next_transmission(100, u64::MAX).unwrap();
        assert_eq!(retx.offset, 0);
        assert_eq!(retx.data.as_ref(), b"abcd");
    }

    #[test]
    fn reset_clears_buffers_and_reports_final_size() {
        let mut stream = stream();
        stream.write(Bytes::from_static(&[2; 500]), false).unwrap();
        let _ = stream.next_transmission(100, u64::MAX).unwrap();

        stream.reset(application::Error::from(42u32)).unwrap();
        let (error, final_size) = stream.take_pending_reset().unwrap();
        assert_eq!(error.as_u64(), 42);
        assert_eq!(final_size.as_u64(), 100);

        assert!(stream.next_transmission(100, u64::MAX).is_none());
        assert_eq!(stream.buffered_len(), 0);
        assert!(stream.write(Bytes::from_static(b"x"), false).is_err());
    }

    #[test]
    fn interleaved_ack_and_loss_never_panics() {
        bolero::check!()
            .with_type::<Vec<(u8, u8)>>()
            .for_each(|ops| {
                let mut stream = stream();
                stream.write(Bytes::from_static(&[7; 256]), true).unwrap();
                let mut outstanding: Vec<SentRange> = Vec::new();

                for (value, action) in ops {
                    match action % 3 {
                        0 => {
                            let budget = *value as usize % 32 + 1;
                            if let Some(tx) = stream.next_transmission(budget, u64::MAX) {
                                outstanding.push(SentRange {
                                    offset: tx.offset,
                                    len: tx.data.len() as u64,
                                    fin: tx.fin,
                                });
                            }
                        }
                        1 if !outstanding.is_empty() => {
                            let index = *value as usize % outstanding.len();
                            let range = outstanding.remove(index);
                            stream.on_range_acked(range);
                        }
                        _ if !outstanding.is_empty() => {
                            let index = *value as usize % outstanding.len();
                            let range = outstanding.remove(index);
                            stream.on_range_lost(range);
                        }
                        _ => {}
                    }
                }
            });
    }

    #[test]
    fn bare_fin_transmits() {
        let mut stream = stream();
        stream.write(Bytes::new(), true).unwrap();
        let tx = stream.next_transmission(100, u64::MAX).unwrap();
        assert!(tx.fin);
        assert!(tx.data.is_empty());
        assert_eq!(stream.state, SendState::DataSent);
    }
}
