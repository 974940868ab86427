// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Receive-side packet number tracking and ACK scheduling.

use crate::{
    frame::Ack,
    inet::{EcnCounts, ExplicitCongestionNotification},
    interval_set::IntervalSet,
    packet::number::PacketNumberSpace,
    time::{Timer, Timestamp},
    varint::VarInt,
};
use core::time::Duration;

/// Locally applied acknowledgment policy
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub max_ack_delay: Duration,
    pub ack_delay_exponent: u8,
    /// Ack-eliciting packets received before an immediate ACK is forced
    pub packet_tolerance: u8,
    /// Bound on ranges carried per ACK frame
    pub max_ack_ranges: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
            //# the RECOMMENDED value of the maximum delay is 25 milliseconds.
            max_ack_delay: Duration::from_millis(25),
            ack_delay_exponent: 3,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.2
            //# A receiver SHOULD send an ACK frame after receiving at least
            //# two ack-eliciting packets.
            packet_tolerance: 2,
            max_ack_ranges: 10,
        }
    }
}

/// The verdict for a freshly received packet number
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// First sight; process the packet
    New,
    /// Already processed (or too old to distinguish); drop the packet
    Duplicate,
}

/// Tracks received packet numbers for one space and decides when an ACK
/// frame is due.
#[derive(Debug)]
pub struct Tracker {
    space: PacketNumberSpace,
    settings: Settings,

    /// Packet numbers processed and not yet released from tracking
    ranges: IntervalSet,
    /// Numbers below this are treated as duplicates even after their
    /// ranges were shed
    watermark: u64,

    largest_received_time: Option<Timestamp>,
    ecn_counts: EcnCounts,

    ack_timer: Timer,
    ack_eliciting_unacked: u8,
    ack_immediately: bool,
}

impl Tracker {
    pub fn new(space: PacketNumberSpace, settings: Settings) -> Self {
        Self {
            space,
            settings,
            ranges: IntervalSet::new(),
            watermark: 0,
            largest_received_time: None,
            ecn_counts: EcnCounts::default(),
            ack_timer: Timer::default(),
            ack_eliciting_unacked: 0,
            ack_immediately: false,
        }
    }

    #[inline]
    pub fn largest_received(&self) -> Option<u64> {
        self.ranges.max_value()
    }

    /// Records a successfully decrypted packet.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
    //# A receiver MUST discard a newly unprotected packet unless it is
    //# certain that it has not processed another packet with the same
    //# packet number
    pub fn on_packet_received(
        &mut self,
        packet_number: u64,
        ack_eliciting: bool,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) -> Outcome {
        if packet_number < self.watermark || !self.ranges.insert_value(packet_number) {
            return Outcome::Duplicate;
        }

        if Some(packet_number) == self.ranges.max_value() {
            self.largest_received_time = Some(now);
        }

        self.ecn_counts.on_packet(ecn);

        if ack_eliciting {
            self.ack_eliciting_unacked = self.ack_eliciting_unacked.saturating_add(1);

            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
            //# Similarly, packets marked with the ECN Congestion Experienced
            //# (CE) codepoint in the IP header SHOULD be acknowledged
            //# immediately
            let out_of_order = self
                .ranges
                .max_value()
                .is_some_and(|largest| packet_number < largest)
                || self.ranges.interval_len() > 1;

            if !self.space.is_application_data()
                || ecn.congestion_experienced()
                || out_of_order
                || self.ack_eliciting_unacked >= self.settings.packet_tolerance
            {
                self.ack_immediately = true;
            } else if !self.ack_timer.is_armed() {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
                //# An endpoint MUST acknowledge all ack-eliciting Initial and
                //# Handshake packets immediately and all ack-eliciting 0-RTT
                //# and 1-RTT packets within its advertised max_ack_delay
                self.ack_timer.set(now + self.settings.max_ack_delay);
            }
        }

        Outcome::New
    }

    pub fn on_timeout(&mut self, now: Timestamp) {
        if self.ack_timer.poll_expiration(now).is_ready() {
            self.ack_immediately = true;
        }
    }

    #[inline]
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.ack_timer.next_expiration()
    }

    /// Returns true if an ACK frame should be bundled into the next
    /// packet
    #[inline]
    pub fn ack_required(&self) -> bool {
        self.ack_immediately
    }

    /// Returns true if anything is available to acknowledge
    #[inline]
    pub fn has_ack_interest(&self) -> bool {
        !self.ranges.is_empty() && (self.ack_immediately || self.ack_eliciting_unacked > 0)
    }

    /// Builds the ACK frame for the next packet, if one is due
    pub fn ack_frame(&mut self, now: Timestamp) -> Option<Ack> {
        if self.ranges.is_empty() {
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.5
        //# Since the receiver doesn't use the ACK Delay for Initial and
        //# Handshake packets, a receiver SHOULD send a value of 0.
        let delay_micros = if self.space.is_application_data() {
            self.largest_received_time
                .map(|received| now.saturating_duration_since(received).as_micros() as u64)
                .unwrap_or(0)
        } else {
            0
        };
        let ack_delay =
            VarInt::new(delay_micros >> self.settings.ack_delay_exponent).unwrap_or(VarInt::MAX);

        let ecn = if self.ecn_counts.is_some() {
            Some(self.ecn_counts)
        } else {
            None
        };

        let frame = Ack::from_interval_set(&self.ranges, ack_delay, self.settings.max_ack_ranges, ecn)?;

        self.ack_immediately = false;
        self.ack_eliciting_unacked = 0;
        self.ack_timer.cancel();
        Some(frame)
    }

    /// The peer confirmed receipt of an ACK we sent whose largest
    /// acknowledged was `largest`; stop reporting anything at or below it
    pub fn on_ack_frame_acked(&mut self, largest: u64) {
        self.watermark = self.watermark.max(largest.saturating_add(1));
        self.ranges.remove_until(self.watermark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn tracker(space: PacketNumberSpace) -> Tracker {
        Tracker::new(space, Settings::default())
    }

    const NOT_ECT: ExplicitCongestionNotification = ExplicitCongestionNotification::NotEct;

    #[test]
    fn duplicates_are_rejected() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        assert_eq!(tracker.on_packet_received(3, true, NOT_ECT, at(1)), Outcome::New);
        assert_eq!(
            tracker.on_packet_received(3, true, NOT_ECT, at(2)),
            Outcome::Duplicate
        );
    }

    #[test]
    fn watermark_rejects_ancient_numbers() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        for pn in 0..10 {
            tracker.on_packet_received(pn, true, NOT_ECT, at(pn));
        }
        tracker.on_ack_frame_acked(9);

        // even though the range was shed, replays stay duplicates
        assert_eq!(
            tracker.on_packet_received(5, true, NOT_ECT, at(20)),
            Outcome::Duplicate
        );
        assert_eq!(tracker.on_packet_received(10, true, NOT_ECT, at(21)), Outcome::New);
    }

    #[test]
    fn handshake_spaces_ack_immediately() {
        let mut tracker = tracker(PacketNumberSpace::Initial);
        tracker.on_packet_received(0, true, NOT_ECT, at(1));
        assert!(tracker.ack_required());
    }

    #[test]
    fn application_space_delays_first_eliciting() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        tracker.on_packet_received(0, true, NOT_ECT, at(1));
        assert!(!tracker.ack_required());
        assert_eq!(tracker.next_expiration(), Some(at(1) + Duration::from_millis(25)));

        // the timer firing forces the ACK out
        tracker.on_timeout(at(27));
        assert!(tracker.ack_required());
    }

    #[test]
    fn second_eliciting_packet_forces_ack() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        tracker.on_packet_received(0, true, NOT_ECT, at(1));
        tracker.on_packet_received(1, true, NOT_ECT, at(2));
        assert!(tracker.ack_required());
    }

    #[test]
    fn reordering_forces_ack() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        tracker.on_packet_received(1, false, NOT_ECT, at(1));
        assert!(!tracker.ack_required());
        tracker.on_packet_received(0, true, NOT_ECT, at(2));
        assert!(tracker.ack_required());
    }

    #[test]
    fn ack_frame_reports_and_resets() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        tracker.on_packet_received(0, true, NOT_ECT, at(1));
        tracker.on_packet_received(1, true, NOT_ECT, at(2));

        let frame = tracker.ack_frame(at(10)).unwrap();
        assert_eq!(frame.largest_acknowledged(), 1);
        assert!(!tracker.ack_required());

        // ack delay is measured from the largest received packet, scaled
        // by the exponent: 8ms = 8000us >> 3 = 1000
        assert_eq!(frame.ack_delay.as_u64(), 1000);
    }

    #[test]
    fn ecn_counts_reported() {
        let mut tracker = tracker(PacketNumberSpace::ApplicationData);
        tracker.on_packet_received(0, true, ExplicitCongestionNotification::Ect0, at(1));
        tracker.on_packet_received(1, true, ExplicitCongestionNotification::Ce, at(2));

        // CE also forces an immediate ACK
        assert!(tracker.ack_required());
        let frame = tracker.ack_frame(at(3)).unwrap();
        let counts = frame.ecn_counts.unwrap();
        assert_eq!(counts.ect_0_count, 1);
        assert_eq!(counts.ce_count, 1);
    }
}
