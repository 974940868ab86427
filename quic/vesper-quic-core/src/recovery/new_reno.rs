// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{
        congestion_controller::{initial_window, minimum_window, CongestionController},
        hybrid_slow_start::HybridSlowStart,
        pacing::Pacer,
        Bandwidth, RttEstimator,
    },
    time::Timestamp,
};

//= https://www.rfc-editor.org/rfc/rfc9002#section-7
//# The algorithm in this document is based on TCP NewReno [RFC6582].

/// The RFC 9002 baseline controller: NewReno with HyStart++.
#[derive(Debug)]
pub struct NewReno {
    max_datagram_size: u16,
    congestion_window: u32,
    bytes_in_flight: u32,
    slow_start_threshold: u32,
    /// Set when entering recovery; packets sent before this time do not
    /// trigger further window reductions
    recovery_start_time: Option<Timestamp>,
    hybrid_slow_start: HybridSlowStart,
    pacer: Pacer,
    /// Fractional congestion-avoidance growth carried between ACKs
    bytes_acked_in_avoidance: u32,
}

impl NewReno {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            congestion_window: initial_window(max_datagram_size),
            bytes_in_flight: 0,
            slow_start_threshold: u32::MAX,
            recovery_start_time: None,
            hybrid_slow_start: HybridSlowStart::default(),
            pacer: Pacer::default(),
            bytes_acked_in_avoidance: 0,
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
    //# A recovery period ends and the sender enters congestion avoidance
    //# when a packet sent during the recovery period is acknowledged.
    #[inline]
    fn in_recovery(&self, time_sent: Timestamp) -> bool {
        match self.recovery_start_time {
            Some(start) => time_sent <= start,
            None => false,
        }
    }

    fn on_congestion_event(&mut self, newest_time_sent: Timestamp, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
        //# The sender MUST exit slow start and enter a recovery period when
        //# a packet is lost or when the ECN-CE count reported by its peer
        //# increases.
        if self.in_recovery(newest_time_sent) {
            return;
        }

        self.recovery_start_time = Some(now);
        self.hybrid_slow_start.on_congestion_event();

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# On entering a recovery period, a sender MUST set the slow start
        //# threshold to half the value of the congestion window when loss is
        //# detected.
        self.slow_start_threshold =
            (self.congestion_window / 2).max(minimum_window(self.max_datagram_size));
        self.congestion_window = self.slow_start_threshold;
        self.bytes_acked_in_avoidance = 0;
    }
}

impl CongestionController for NewReno {
    #[inline]
    fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
    //# A sender begins in slow start because the slow start threshold
    //# is initialized to an infinite value.
    #[inline]
    fn is_slow_start(&self) -> bool {
        self.congestion_window < self.slow_start_threshold
    }

    #[inline]
    fn max_datagram_size(&self) -> u16 {
        self.max_datagram_size
    }

    fn on_packet_sent(&mut self, time_sent: Timestamp, bytes: usize, rtt: &RttEstimator) {
        if bytes == 0 {
            // ACK-only packets are not congestion controlled
            return;
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(bytes as u32);
        let rate = Pacer::rate(self.congestion_window, rtt, self.is_slow_start());
        self.pacer
            .on_packet_sent(time_sent, bytes, rate, self.max_datagram_size);
    }

    fn on_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt: &RttEstimator,
        _now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_acknowledged as u32);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# The congestion window does not increase in the recovery period.
        if self.in_recovery(newest_acked_time_sent) {
            return;
        }

        if self.is_slow_start() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
            //# While a sender is in slow start, the congestion window
            //# increases by the number of bytes acknowledged
            self.congestion_window = self
                .congestion_window
                .saturating_add(bytes_acknowledged as u32);

            if self
                .hybrid_slow_start
                .on_rtt_sample(newest_acked_time_sent, rtt.latest_rtt())
            {
                // queueing detected: fall into congestion avoidance here
                self.slow_start_threshold = self.congestion_window;
            }
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.3
        //# a sender MAY increase the congestion window by
        //# max_datagram_size for each congestion window of bytes
        //# acknowledged.
        self.bytes_acked_in_avoidance = self
            .bytes_acked_in_avoidance
            .saturating_add(bytes_acknowledged as u32);
        while self.bytes_acked_in_avoidance >= self.congestion_window {
            self.bytes_acked_in_avoidance -= self.congestion_window;
            self.congestion_window = self
                .congestion_window
                .saturating_add(self.max_datagram_size as u32);
        }
    }

    fn on_loss(&mut self, lost_bytes: usize, newest_lost_time_sent: Timestamp, now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes as u32);
        self.on_congestion_event(newest_lost_time_sent, now);
    }

    fn on_persistent_congestion(&mut self) {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# When persistent congestion is declared, the sender's congestion
        //# window MUST be reduced to the minimum congestion window
        //# (kMinimumWindow), and the sender responds as it would to loss
        self.congestion_window = minimum_window(self.max_datagram_size);
        self.slow_start_threshold = u32::MAX;
        self.recovery_start_time = None;
        self.bytes_acked_in_avoidance = 0;
        self.hybrid_slow_start.restart();
    }

    fn on_ecn_ce(&mut self, _ce_increase: u64, now: Timestamp) {
        self.on_congestion_event(now, now);
    }

    fn on_packet_discarded(&mut self, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u32);
    }

    #[inline]
    fn pacing_rate(&self) -> Bandwidth {
        // rate is recomputed against the live rtt on each send; expose the
        // unscaled window rate between sends
        Bandwidth::new(self.congestion_window as u64, core::time::Duration::from_secs(1))
    }

    fn can_send(&self, now: Timestamp) -> usize {
        if !self.pacer.can_send(now) {
            return 0;
        }
        self.congestion_window.saturating_sub(self.bytes_in_flight) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn rtt() -> RttEstimator {
        RttEstimator::default()
    }

    #[test]
    fn slow_start_doubles_per_round() {
        let mut cc = NewReno::new(1200);
        let initial = cc.congestion_window();

        cc.on_packet_sent(at(0), initial as usize, &rtt());
        assert_eq!(cc.bytes_in_flight(), initial);

        cc.on_ack(at(0), initial as usize, &rtt(), at(50));
        assert_eq!(cc.congestion_window(), initial * 2);
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
    //# On entering a recovery period, a sender MUST set the slow start
    //# threshold to half the value of the congestion window when loss is
    //# detected.
    #[test]
    fn loss_halves_window_once_per_recovery() {
        let mut cc = NewReno::new(1200);
        let initial = cc.congestion_window();

        cc.on_packet_sent(at(0), 3600, &rtt());
        cc.on_loss(1200, at(0), at(100));
        assert_eq!(cc.congestion_window(), initial / 2);

        // a second loss from the same flight does not halve again
        cc.on_loss(1200, at(0), at(110));
        assert_eq!(cc.congestion_window(), initial / 2);

        // a loss sent after recovery began does
        cc.on_packet_sent(at(200), 1200, &rtt());
        cc.on_loss(1200, at(200), at(250));
        assert_eq!(cc.congestion_window(), initial / 4);
    }

    #[test]
    fn window_never_collapses_below_minimum() {
        let mut cc = NewReno::new(1200);
        for round in 0..20u64 {
            cc.on_packet_sent(at(round * 10), 1200, &rtt());
            cc.on_loss(1200, at(round * 10), at(round * 10 + 5));
        }
        assert!(cc.congestion_window() >= minimum_window(1200));
    }

    #[test]
    fn persistent_congestion_collapses_to_minimum() {
        let mut cc = NewReno::new(1200);
        cc.on_packet_sent(at(0), 12_000, &rtt());
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), minimum_window(1200));
        assert!(cc.is_slow_start());
    }

    #[test]
    fn avoidance_grows_linearly() {
        let mut cc = NewReno::new(1200);
        cc.on_packet_sent(at(0), 1200, &rtt());
        cc.on_loss(1200, at(0), at(10));
        let window = cc.congestion_window();
        assert!(!cc.is_slow_start());

        // one full window of acked bytes grows the window by one datagram
        cc.on_packet_sent(at(20), window as usize, &rtt());
        cc.on_ack(at(20), window as usize, &rtt(), at(70));
        assert_eq!(cc.congestion_window(), window + 1200);
    }

    #[test]
    fn can_send_respects_window() {
        let cc = NewReno::new(1200);
        let window = cc.congestion_window();
        assert_eq!(cc.can_send(at(1)), window as usize);
    }
}
