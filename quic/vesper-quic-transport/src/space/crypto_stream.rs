// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The outgoing CRYPTO stream for one encryption level.
//!
//! Handshake volumes are small, so the entire stream is retained until
//! acknowledged and indexed directly by offset.

use alloc::vec::Vec;
use bytes::Bytes;
use vesper_quic_core::interval_set::{Interval, IntervalSet};

#[derive(Debug, Default)]
pub struct CryptoSendBuffer {
    /// Every byte ever queued at this level, offset-indexed from zero
    data: Vec<u8>,
    /// First byte never transmitted
    send_offset: u64,
    /// Lost ranges owed a retransmission
    pending_retransmit: IntervalSet,
    acked: IntervalSet,
}

impl CryptoSendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues handshake bytes produced by the TLS engine
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    #[inline]
    pub fn has_transmission_interest(&self) -> bool {
        !self.pending_retransmit.is_empty() || self.send_offset < self.data.len() as u64
    }

    /// Produces the next CRYPTO chunk, at most `max_len` bytes
    pub fn next_transmission(&mut self, max_len: usize) -> Option<(u64, Bytes)> {
        if max_len == 0 {
            return None;
        }

        let first = self.pending_retransmit.iter().next();
        if let Some(range) = first {
            let start = range.start;
            let len = range.len().min(max_len as u64);
            self.pending_retransmit.remove_until(start + len);
            let data = Bytes::copy_from_slice(
                &self.data[start as usize..(start + len) as usize],
            );
            return Some((start, data));
        }

        let unsent = self.data.len() as u64 - self.send_offset;
        if unsent > 0 {
            let len = unsent.min(max_len as u64);
            let offset = self.send_offset;
            self.send_offset += len;
            let data =
                Bytes::copy_from_slice(&self.data[offset as usize..(offset + len) as usize]);
            return Some((offset, data));
        }

        None
    }

    pub fn on_range_acked(&mut self, offset: u64, len: u64) {
        if len > 0 {
            self.acked.insert(Interval::new(offset, offset + len - 1));
            self.pending_retransmit.remove_until(self.contiguous_acked());
        }
    }

    pub fn on_range_lost(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let interval = Interval::new(offset, offset + len - 1);
        if !(self.acked.contains(interval.start) && self.acked.contains(interval.end)) {
            self.pending_retransmit.insert(interval);
        }
    }

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

    /// True once every transmitted byte is acknowledged
    pub fn is_fully_acked(&self) -> bool {
        self.contiguous_acked() >= self.data.len() as u64
    }

    /// Rewinds the stream so every byte transmits again, e.g. when the
    /// handshake restarts on a new version
    pub fn restart(&mut self) {
        self.send_offset = 0;
        self.pending_retransmit.clear();
        self.acked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_in_order_then_retransmit_losses() {
        let mut buffer = CryptoSendBuffer::new();
        buffer.push(b"client hello");
        assert!(buffer.has_transmission_interest());

        let (offset, first) = buffer.next_transmission(6).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(first.as_ref(), b"client");

        let (offset, second) = buffer.next_transmission(100).unwrap();
        assert_eq!(offset, 6);
        assert_eq!(second.as_ref(), b" hello");
        assert!(!buffer.has_transmission_interest());

        buffer.on_range_lost(0, 6);
        let (offset, retx) = buffer.next_transmission(100).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(retx.as_ref(), b"client");

        buffer.on_range_acked(0, 6);
        buffer.on_range_acked(6, 6);
        assert!(buffer.is_fully_acked());
    }

    #[test]
    fn acked_ranges_are_not_retransmitted() {
        let mut buffer = CryptoSendBuffer::new();
        buffer.push(&[1; 100]);
        let _ = buffer.next_transmission(100).unwrap();

        buffer.on_range_acked(0, 100);
        buffer.on_range_lost(0, 100);
        assert!(!buffer.has_transmission_interest());
    }
}
