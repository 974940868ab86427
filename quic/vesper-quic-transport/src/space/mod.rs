// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-packet-number-space state: send numbering, received-packet
//! tracking, the CRYPTO stream, loss detection, and the PTO.
//!
//! Under multipath, the application space is instantiated once per path;
//! Initial and Handshake spaces always live on the initial path.

pub mod crypto_stream;

pub use crypto_stream::CryptoSendBuffer;

use crate::transmission::Manifest;
use alloc::vec::Vec;
use vesper_quic_core::{
    ack,
    buffer::Reassembler,
    frame,
    packet::number::{PacketNumber, PacketNumberSpace},
    path::Path,
    recovery::{
        loss_delay, CongestionController, Pto, SentPacketInfo, SentPackets, K_PACKET_THRESHOLD,
    },
    time::{earliest, Timer, Timestamp},
    transport,
    varint::VarInt,
};

/// A packet removed from tracking by an acknowledgment or a loss verdict
pub type TrackedPacket = (u64, SentPacketInfo<Manifest>);

/// The result of processing one ACK frame
#[derive(Debug, Default)]
pub struct AckOutcome {
    pub newly_acked: Vec<TrackedPacket>,
    pub lost: Vec<TrackedPacket>,
    /// An RTT sample was taken (the largest acknowledged was newly acked)
    pub rtt_updated: bool,
}

#[derive(Debug)]
pub struct PacketSpace {
    space: PacketNumberSpace,
    pub ack_tracker: ack::Tracker,
    pub sent: SentPackets<Manifest>,
    pub crypto_rx: Reassembler,
    pub crypto_tx: CryptoSendBuffer,

    next_packet_number: u64,
    /// Largest packet number successfully processed (rx side)
    pub largest_processed: Option<PacketNumber>,
    /// Largest packet number the peer acknowledged (tx side)
    pub largest_acked: Option<PacketNumber>,

    /// Send time of the most recent ack-eliciting packet
    time_of_last_ack_eliciting: Option<Timestamp>,

    loss_timer: Timer,
    pub pto: Pto,
    pub pto_backoff: u32,

    is_discarded: bool,
}

impl PacketSpace {
    pub fn new(space: PacketNumberSpace, ack_settings: ack::Settings) -> Self {
        Self {
            space,
            ack_tracker: ack::Tracker::new(space, ack_settings),
            sent: SentPackets::new(),
            crypto_rx: Reassembler::new(),
            crypto_tx: CryptoSendBuffer::new(),
            next_packet_number: 0,
            largest_processed: None,
            largest_acked: None,
            time_of_last_ack_eliciting: None,
            loss_timer: Timer::default(),
            pto: Pto::default(),
            pto_backoff: 1,
            is_discarded: false,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn is_discarded(&self) -> bool {
        self.is_discarded
    }

    /// Assigns the next packet number for transmission
    pub fn next_packet_number(&mut self) -> PacketNumber {
        let pn = self
            .space
            .new_packet_number(VarInt::new(self.next_packet_number).unwrap_or(VarInt::MAX));
        self.next_packet_number += 1;
        pn
    }

    /// Records a transmitted packet and arms the PTO
    pub fn on_packet_sent(
        &mut self,
        packet_number: PacketNumber,
        manifest: Manifest,
        sent_bytes: usize,
        ack_eliciting: bool,
        in_flight: bool,
        path: &mut Path,
        now: Timestamp,
    ) {
        if ack_eliciting {
            self.time_of_last_ack_eliciting = Some(now);
            let period = path.rtt_estimator.pto_period(self.pto_backoff, self.space);
            self.pto.update(now, period);
        }

        if in_flight {
            path.congestion_controller
                .on_packet_sent(now, sent_bytes, &path.rtt_estimator);
        }

        self.sent.insert(
            packet_number,
            SentPacketInfo {
                time_sent: now,
                sent_bytes: sent_bytes.min(u16::MAX as usize) as u16,
                ack_eliciting,
                in_flight,
                data: manifest,
            },
        );
    }

    /// Records a successfully processed incoming packet
    pub fn on_packet_processed(&mut self, packet_number: PacketNumber) {
        self.largest_processed = Some(match self.largest_processed {
            Some(largest) => largest.max(packet_number),
            None => packet_number,
        });
    }

    /// Processes an ACK frame received for this space.
    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1
    //# A packet is declared lost if ... a packet that was sent earlier
    //# than an acknowledged packet was sent kThresholdPackets before or
    //# kTimeThreshold earlier in time.
    pub fn on_ack_frame(
        &mut self,
        ack: &frame::Ack,
        ack_delay: core::time::Duration,
        is_handshake_confirmed: bool,
        path: &mut Path,
        now: Timestamp,
    ) -> Result<AckOutcome, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.1
        //# An endpoint SHOULD treat receipt of an acknowledgment for a
        //# packet it did not send as a connection error of type
        //# PROTOCOL_VIOLATION
        if ack.largest_acknowledged() >= self.next_packet_number {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("ack for a packet that was never sent"));
        }

        let mut outcome = AckOutcome::default();
        for range in ack.ranges() {
            outcome
                .newly_acked
                .extend(self.sent.remove_range(range.start, range.end));
        }

        if outcome.newly_acked.is_empty() {
            // a duplicate ACK must not shrink bytes in flight again
            return Ok(outcome);
        }

        let largest = ack.largest_acknowledged();
        self.largest_acked = Some(match self.largest_acked {
            Some(previous) => {
                previous.max(self.space.new_packet_number(
                    VarInt::new(largest).unwrap_or(VarInt::MAX),
                ))
            }
            None => self
                .space
                .new_packet_number(VarInt::new(largest).unwrap_or(VarInt::MAX)),
        });

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
        //# An endpoint generates an RTT sample on receiving an ACK frame
        //# that meets the following two conditions:
        //# *  the largest acknowledged packet number is newly acknowledged
        //# *  at least one of the newly acknowledged packets was ack-eliciting
        let newest = outcome
            .newly_acked
            .iter()
            .find(|(pn, _)| *pn == largest);
        if let Some((_, info)) = newest {
            if outcome.newly_acked.iter().any(|(_, info)| info.ack_eliciting) {
                path.rtt_estimator.update_rtt(
                    ack_delay,
                    now.saturating_duration_since(info.time_sent),
                    now,
                    is_handshake_confirmed,
                    self.space,
                );
                outcome.rtt_updated = true;
            }
        }

        // congestion feedback: one call per ACK with aggregate bytes
        let acked_bytes: usize = outcome
            .newly_acked
            .iter()
            .filter(|(_, info)| info.in_flight)
            .map(|(_, info)| info.sent_bytes as usize)
            .sum();
        let newest_time_sent = outcome
            .newly_acked
            .iter()
            .map(|(_, info)| info.time_sent)
            .max();
        if let Some(newest_time_sent) = newest_time_sent {
            path.congestion_controller.on_ack(
                newest_time_sent,
                acked_bytes,
                &path.rtt_estimator,
                now,
            );
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# The PTO backoff factor is reset when an acknowledgment is
        //# received
        self.pto_backoff = 1;
        path.on_ack_received();

        self.detect_lost(path, now, &mut outcome.lost);
        self.process_lost(&outcome.lost, path, now);
        self.rearm_loss_timers(path, now);

        Ok(outcome)
    }

    /// Declares packets lost by packet or time threshold
    fn detect_lost(&mut self, path: &Path, now: Timestamp, lost: &mut Vec<TrackedPacket>) {
        let Some(largest_acked) = self.largest_acked else {
            return;
        };
        let largest_acked = largest_acked.as_u64();
        let delay = loss_delay(&path.rtt_estimator);

        lost.extend(self.sent.remove_if(|pn, info| {
            if pn > largest_acked {
                return false;
            }
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
            //# the packet was sent kPacketThreshold packets before an
            //# acknowledged packet
            pn + K_PACKET_THRESHOLD <= largest_acked
                //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
                //# the packet ... was sent long enough in the past
                || info.time_sent + delay <= now
        }));
    }

    /// Applies congestion consequences of a loss batch
    fn process_lost(&mut self, lost: &[TrackedPacket], path: &mut Path, now: Timestamp) {
        if lost.is_empty() {
            return;
        }

        let lost_bytes: usize = lost
            .iter()
            .filter(|(_, info)| info.in_flight)
            .map(|(_, info)| info.sent_bytes as usize)
            .sum();
        let newest_lost_time = lost
            .iter()
            .map(|(_, info)| info.time_sent)
            .max()
            .expect("non-empty loss batch");

        path.congestion_controller
            .on_loss(lost_bytes, newest_lost_time, now);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# A sender establishes persistent congestion after the receipt of
        //# an acknowledgment if two packets that are ack-eliciting are
        //# declared lost, and:
        //# ...the duration between the send times of these two packets
        //# exceeds the persistent congestion duration
        if path.rtt_estimator.first_rtt_sample().is_some() {
            let eliciting: Vec<&TrackedPacket> = lost
                .iter()
                .filter(|(_, info)| info.ack_eliciting)
                .collect();
            if eliciting.len() >= 2 {
                let first = eliciting.first().expect("len checked");
                let last = eliciting.last().expect("len checked");
                let contiguous =
                    last.0 - first.0 + 1 == eliciting.len() as u64;
                let span = last.1.time_sent.saturating_duration_since(first.1.time_sent);
                if contiguous && span > path.rtt_estimator.persistent_congestion_duration() {
                    path.congestion_controller.on_persistent_congestion();
                }
            }
        }
    }

    /// Arms the loss timer at the earliest candidate loss time, or the
    /// PTO when nothing is pending loss
    fn rearm_loss_timers(&mut self, path: &Path, now: Timestamp) {
        let Some(largest_acked) = self.largest_acked.map(|pn| pn.as_u64()) else {
            return;
        };
        let delay = loss_delay(&path.rtt_estimator);

        let next_loss_time = self
            .sent
            .iter()
            .filter(|(pn, _)| *pn <= largest_acked)
            .map(|(_, info)| info.time_sent + delay)
            .min();

        match next_loss_time {
            Some(time) => self.loss_timer.set(time.max(now)),
            None => self.loss_timer.cancel(),
        }

        if self.sent.has_ack_eliciting() {
            if let Some(base) = self.time_of_last_ack_eliciting {
                let period = path.rtt_estimator.pto_period(self.pto_backoff, self.space);
                self.pto.update(base, period);
            }
        } else {
            self.pto.cancel();
        }
    }

    /// Fires due timers; returns packets newly declared lost
    pub fn on_timeout(&mut self, path: &mut Path, now: Timestamp) -> Vec<TrackedPacket> {
        self.ack_tracker.on_timeout(now);

        let mut lost = Vec::new();
        if self.loss_timer.poll_expiration(now).is_ready() {
            self.detect_lost(path, now, &mut lost);
            self.process_lost(&lost, path, now);
            self.rearm_loss_timers(path, now);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When a PTO timer expires, the PTO backoff MUST be doubled
        if self.pto.on_timeout(now).is_ready() {
            self.pto_backoff = self.pto_backoff.saturating_mul(2);
            path.on_pto();
        }

        lost
    }

    /// The earliest deadline among this space's timers
    pub fn next_expiration(&self) -> Option<Timestamp> {
        earliest([
            self.ack_tracker.next_expiration(),
            self.loss_timer.next_expiration(),
            self.pto.next_expiration(),
        ])
    }

    /// Drops all state when the space's keys are discarded.
    ///
    /// In-flight bytes are released from the congestion controller
    /// without a loss verdict.
    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9
    //# An endpoint MUST discard its Initial keys when it first sends a
    //# Handshake packet and when it receives its first Handshake packet.
    pub fn discard(&mut self, path: &mut Path) {
        for (_, info) in self.sent.drain() {
            if info.in_flight {
                path.congestion_controller
                    .on_packet_discarded(info.sent_bytes as usize);
            }
        }
        self.loss_timer.cancel();
        self.pto.cancel();
        self.is_discarded = true;
    }

    /// True if this space needs to put anything on the wire
    pub fn has_transmission_interest(&self) -> bool {
        !self.is_discarded
            && (self.crypto_tx.has_transmission_interest()
                || self.ack_tracker.ack_required()
                || self.pto.transmissions_owed() > 0)
    }
}

/// Derives the recovery manager constants for tests
#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use vesper_quic_core::{
        inet::{AddressPair, ExplicitCongestionNotification},
        recovery::{Algorithm, Controller, RttEstimator},
        time::Duration,
    };

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn path() -> Path {
        let local = "10.0.0.1:4433".parse().unwrap();
        let remote = "192.0.2.1:443".parse().unwrap();
        let mut path = Path::new(
            vesper_quic_core::path::Id::ZERO,
            AddressPair::new(local, remote),
            Controller::new(Algorithm::NewReno, 1200),
            RttEstimator::default(),
        );
        path.on_validated(1472);
        path
    }

    fn space() -> PacketSpace {
        PacketSpace::new(PacketNumberSpace::ApplicationData, ack::Settings::default())
    }

    fn send_n(space: &mut PacketSpace, path: &mut Path, count: u64, start_millis: u64) {
        for index in 0..count {
            let pn = space.next_packet_number();
            space.on_packet_sent(
                pn,
                smallvec![],
                1200,
                true,
                true,
                path,
                at(start_millis + index),
            );
        }
    }

    fn ack_frame(ranges: &[core::ops::RangeInclusive<u64>]) -> frame::Ack {
        let set: vesper_quic_core::interval_set::IntervalSet =
            ranges.iter().cloned().collect();
        frame::Ack::from_interval_set(&set, VarInt::ZERO, 10, None).unwrap()
    }

    /// Send 10 packets, ACK 1-4 and 8-10: 5, 6, 7 fall to the packet
    /// threshold; the window is reduced exactly once
    #[test]
    fn packet_threshold_loss() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 11, 100);
        let initial_window = path.congestion_controller.congestion_window();

        let outcome = space
            .on_ack_frame(
                &ack_frame(&[1..=4, 8..=10]),
                Duration::ZERO,
                true,
                &mut path,
                at(200),
            )
            .unwrap();

        assert_eq!(outcome.newly_acked.len(), 7);
        let lost: Vec<u64> = outcome.lost.iter().map(|(pn, _)| *pn).collect();
        assert_eq!(lost, [0, 5, 6, 7]);

        // the ACK grows the window in slow start (7 packets of 1200),
        // then the loss event halves it exactly once
        assert_eq!(
            path.congestion_controller.congestion_window(),
            (initial_window + 7 * 1200) / 2
        );

        // bytes in flight only counts the 11 sent minus acked minus lost
        assert_eq!(path.congestion_controller.bytes_in_flight(), 0);
    }

    #[test]
    fn duplicate_ack_does_not_shrink_in_flight() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 3, 100);

        let frame = ack_frame(&[0..=2]);
        space
            .on_ack_frame(&frame, Duration::ZERO, true, &mut path, at(150))
            .unwrap();
        let in_flight = path.congestion_controller.bytes_in_flight();

        let outcome = space
            .on_ack_frame(&frame, Duration::ZERO, true, &mut path, at(160))
            .unwrap();
        assert!(outcome.newly_acked.is_empty());
        assert_eq!(path.congestion_controller.bytes_in_flight(), in_flight);
    }

    #[test]
    fn ack_for_unsent_packet_is_protocol_violation() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 2, 100);

        let result = space.on_ack_frame(
            &ack_frame(&[0..=5]),
            Duration::ZERO,
            true,
            &mut path,
            at(150),
        );
        assert_eq!(
            result.unwrap_err().code,
            transport::Error::PROTOCOL_VIOLATION.code
        );
    }

    #[test]
    fn time_threshold_loss_via_timer() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 2, 100);

        // ack only the later packet; the earlier one is within the packet
        // threshold but will age out
        space
            .on_ack_frame(&ack_frame(&[1..=1]), Duration::ZERO, true, &mut path, at(150))
            .unwrap();
        assert!(space.loss_timer.is_armed());

        // rtt ~50ms, loss delay 9/8·50 ≈ 56ms after the 100ms send time
        let lost = space.on_timeout(&mut path, at(500));
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].0, 0);
    }

    #[test]
    fn pto_fires_and_backs_off() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 1, 100);
        assert!(space.pto.next_expiration().is_some());

        let expiration = space.pto.next_expiration().unwrap();
        space.on_timeout(&mut path, expiration);
        assert_eq!(space.pto.transmissions_owed(), 2);
        assert_eq!(space.pto_backoff, 2);
        assert_eq!(path.pto_count, 1);

        // probes do not change the congestion window
        let window = path.congestion_controller.congestion_window();
        space.on_timeout(&mut path, expiration + Duration::from_secs(1));
        assert_eq!(path.congestion_controller.congestion_window(), window);
    }

    #[test]
    fn rtt_sample_on_newly_acked_largest() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 1, 100);

        let outcome = space
            .on_ack_frame(&ack_frame(&[0..=0]), Duration::ZERO, true, &mut path, at(180))
            .unwrap();
        assert!(outcome.rtt_updated);
        assert_eq!(
            path.rtt_estimator.latest_rtt(),
            Duration::from_millis(80)
        );
    }

    #[test]
    fn discard_releases_in_flight() {
        let mut space = space();
        let mut path = path();
        send_n(&mut space, &mut path, 5, 100);
        assert!(path.congestion_controller.bytes_in_flight() > 0);

        space.discard(&mut path);
        assert_eq!(path.congestion_controller.bytes_in_flight(), 0);
        assert!(space.is_discarded());
        assert!(space.next_expiration().is_none());
    }

    #[test]
    fn received_packets_schedule_acks() {
        let mut space = space();
        let outcome = space.ack_tracker.on_packet_received(
            0,
            true,
            ExplicitCongestionNotification::NotEct,
            at(10),
        );
        assert_eq!(outcome, ack::Outcome::New);
        space.on_packet_processed(
            PacketNumberSpace::ApplicationData.new_packet_number(VarInt::ZERO),
        );
        assert_eq!(
            space.largest_processed.unwrap().as_u64(),
            0
        );
    }
}
