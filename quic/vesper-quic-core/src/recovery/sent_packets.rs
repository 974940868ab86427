// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{packet::number::PacketNumber, time::Timestamp};
use alloc::collections::VecDeque;

/// Everything tracked about an unacknowledged packet.
///
/// `D` carries caller-defined retransmission state (which frames the
/// packet bundled), kept opaque to the recovery machinery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPacketInfo<D> {
    pub time_sent: Timestamp,
    pub sent_bytes: u16,
    pub ack_eliciting: bool,
    /// Counts toward bytes in flight (everything but ACK-only packets)
    pub in_flight: bool,
    pub data: D,
}

/// An ordered map of in-flight packets keyed by packet number.
///
/// Packet numbers are inserted in strictly increasing order, so the map
/// is a sorted deque with binary-search lookups.
#[derive(Clone, Debug, Default)]
pub struct SentPackets<D> {
    packets: VecDeque<(u64, SentPacketInfo<D>)>,
}

impl<D> SentPackets<D> {
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn insert(&mut self, packet_number: PacketNumber, info: SentPacketInfo<D>) {
        let pn = packet_number.as_u64();
        debug_assert!(
            self.packets.back().is_none_or(|(last, _)| *last < pn),
            "packet numbers must be inserted in increasing order"
        );
        self.packets.push_back((pn, info));
    }

    #[inline]
    fn index_of(&self, packet_number: u64) -> Result<usize, usize> {
        self.packets
            .binary_search_by(|(pn, _)| pn.cmp(&packet_number))
    }

    #[inline]
    pub fn get(&self, packet_number: u64) -> Option<&SentPacketInfo<D>> {
        let index = self.index_of(packet_number).ok()?;
        Some(&self.packets[index].1)
    }

    pub fn remove(&mut self, packet_number: u64) -> Option<SentPacketInfo<D>> {
        let index = self.index_of(packet_number).ok()?;
        self.packets.remove(index).map(|(_, info)| info)
    }

    /// Removes and returns every packet in `start..=end`, in order
    pub fn remove_range(&mut self, start: u64, end: u64) -> impl Iterator<Item = (u64, SentPacketInfo<D>)> + '_ {
        let from = match self.index_of(start) {
            Ok(index) | Err(index) => index,
        };
        let to = match self.index_of(end) {
            Ok(index) => index + 1,
            Err(index) => index,
        };
        self.packets.drain(from..to)
    }

    /// Removes every tracked packet, e.g. when a space's keys are dropped
    pub fn drain(&mut self) -> impl Iterator<Item = (u64, SentPacketInfo<D>)> + '_ {
        self.packets.drain(..)
    }

    /// Removes packets matching `predicate`, collecting them in order.
    ///
    /// Used by loss detection to pull out packets past the reordering or
    /// time thresholds in one pass.
    pub fn remove_if(
        &mut self,
        mut predicate: impl FnMut(u64, &SentPacketInfo<D>) -> bool,
    ) -> alloc::vec::Vec<(u64, SentPacketInfo<D>)> {
        let mut removed = alloc::vec::Vec::new();
        let mut index = 0;
        while index < self.packets.len() {
            let (pn, info) = &self.packets[index];
            if predicate(*pn, info) {
                if let Some(entry) = self.packets.remove(index) {
                    removed.push(entry);
                }
            } else {
                index += 1;
            }
        }
        removed
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (u64, &SentPacketInfo<D>)> {
        self.packets.iter().map(|(pn, info)| (*pn, info))
    }

    /// The oldest tracked packet
    #[inline]
    pub fn front(&self) -> Option<(u64, &SentPacketInfo<D>)> {
        self.packets.front().map(|(pn, info)| (*pn, info))
    }

    /// The earliest send time among ack-eliciting in-flight packets
    pub fn earliest_ack_eliciting_time_sent(&self) -> Option<Timestamp> {
        self.packets
            .iter()
            .filter(|(_, info)| info.ack_eliciting)
            .map(|(_, info)| info.time_sent)
            .min()
    }

    /// Returns true if any ack-eliciting packet is still tracked
    #[inline]
    pub fn has_ack_eliciting(&self) -> bool {
        self.packets.iter().any(|(_, info)| info.ack_eliciting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{packet::number::PacketNumberSpace, varint::VarInt};
    use core::time::Duration;

    fn info(millis: u64) -> SentPacketInfo<()> {
        SentPacketInfo {
            time_sent: Timestamp::from_duration(Duration::from_millis(millis)),
            sent_bytes: 1200,
            ack_eliciting: true,
            in_flight: true,
            data: (),
        }
    }

    fn pn(value: u64) -> PacketNumber {
        PacketNumberSpace::ApplicationData.new_packet_number(VarInt::new(value).unwrap())
    }

    fn filled() -> SentPackets<()> {
        let mut packets = SentPackets::new();
        for value in [1u64, 2, 3, 5, 8, 9] {
            packets.insert(pn(value), info(value * 10));
        }
        packets
    }

    #[test]
    fn lookup_and_remove() {
        let mut packets = filled();
        assert_eq!(packets.len(), 6);
        assert!(packets.get(5).is_some());
        assert!(packets.get(4).is_none());

        assert!(packets.remove(5).is_some());
        assert!(packets.remove(5).is_none());
        assert_eq!(packets.len(), 5);
    }

    #[test]
    fn remove_range_spans_gaps() {
        let mut packets = filled();
        let removed: alloc::vec::Vec<u64> =
            packets.remove_range(2, 8).map(|(pn, _)| pn).collect();
        assert_eq!(removed, [2, 3, 5, 8]);
        assert_eq!(packets.len(), 2);
        assert!(packets.get(1).is_some());
        assert!(packets.get(9).is_some());
    }

    #[test]
    fn remove_if_collects_in_order() {
        let mut packets = filled();
        let removed = packets.remove_if(|pn, _| pn < 4);
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[0].0, 1);
        assert_eq!(packets.front().unwrap().0, 5);
    }

    #[test]
    fn earliest_eliciting_time() {
        let mut packets = SentPackets::new();
        packets.insert(
            pn(1),
            SentPacketInfo {
                ack_eliciting: false,
                ..info(10)
            },
        );
        packets.insert(pn(2), info(20));
        assert_eq!(
            packets.earliest_ack_eliciting_time_sent(),
            Some(Timestamp::from_duration(Duration::from_millis(20)))
        );
        assert!(packets.has_ack_eliciting());
    }
}
