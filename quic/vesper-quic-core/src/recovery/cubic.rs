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
use core::time::Duration;
use num_rational::Ratio;
use num_traits::ToPrimitive;

//= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
//# W_cubic(t) = C*(t-K)^3 + W_max (Eq. 1)

/// CUBIC constant C, in units of max_datagram_size per second cubed
const C: Ratio<u64> = Ratio::new_raw(2, 5);

//= https://www.rfc-editor.org/rfc/rfc8312#section-4.5
//# Parameter beta_cubic SHOULD be set to 0.7.
const BETA: Ratio<u64> = Ratio::new_raw(7, 10);

/// RFC 8312 CUBIC with a TCP-friendly reservation floor and HyStart++.
#[derive(Debug)]
pub struct Cubic {
    max_datagram_size: u16,
    congestion_window: u32,
    bytes_in_flight: u32,
    slow_start_threshold: u32,
    recovery_start_time: Option<Timestamp>,

    /// Window size before the last reduction, in bytes
    w_max: f64,
    /// Time period K until W_cubic regrows to w_max
    k: Duration,
    /// Start of the current avoidance epoch
    avoidance_start: Option<Timestamp>,
    /// Estimated Reno window for the TCP-friendly region, in bytes
    w_est: f64,

    hybrid_slow_start: HybridSlowStart,
    pacer: Pacer,
}

impl Cubic {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            congestion_window: initial_window(max_datagram_size),
            bytes_in_flight: 0,
            slow_start_threshold: u32::MAX,
            recovery_start_time: None,
            w_max: 0.0,
            k: Duration::ZERO,
            avoidance_start: None,
            w_est: 0.0,
            hybrid_slow_start: HybridSlowStart::default(),
            pacer: Pacer::default(),
        }
    }

    #[inline]
    fn mds(&self) -> f64 {
        self.max_datagram_size as f64
    }

    #[inline]
    fn in_recovery(&self, time_sent: Timestamp) -> bool {
        match self.recovery_start_time {
            Some(start) => time_sent <= start,
            None => false,
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
    //# K = cubic_root(W_max*(1-beta_cubic)/C) (Eq. 2)
    fn compute_k(&self) -> Duration {
        let beta = BETA.to_f64().unwrap_or(0.7);
        let c = C.to_f64().unwrap_or(0.4);
        let w_max_segments = self.w_max / self.mds();
        let k_cubed = w_max_segments * (1.0 - beta) / c;
        Duration::from_secs_f64(k_cubed.cbrt())
    }

    /// W_cubic(t) in bytes
    fn w_cubic(&self, t: Duration) -> f64 {
        let c = C.to_f64().unwrap_or(0.4);
        let delta = t.as_secs_f64() - self.k.as_secs_f64();
        (c * delta * delta * delta) * self.mds() + self.w_max
    }

    fn on_congestion_event(&mut self, newest_time_sent: Timestamp, now: Timestamp) {
        if self.in_recovery(newest_time_sent) {
            return;
        }
        self.recovery_start_time = Some(now);
        self.hybrid_slow_start.on_congestion_event();

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.6
        //# With fast convergence, when a congestion event occurs, before the
        //# window reduction of the congestion window, a flow remembers the
        //# last value of W_max.
        let current = self.congestion_window as f64;
        self.w_max = if current < self.w_max {
            // fast convergence: release capacity to newer flows
            current * (1.0 + BETA.to_f64().unwrap_or(0.7)) / 2.0
        } else {
            current
        };

        let beta = BETA.to_f64().unwrap_or(0.7);
        let reduced = (current * beta) as u32;
        self.congestion_window = reduced.max(minimum_window(self.max_datagram_size));
        self.slow_start_threshold = self.congestion_window;
        self.k = self.compute_k();
        self.avoidance_start = None;
        self.w_est = self.congestion_window as f64;
    }
}

impl CongestionController for Cubic {
    #[inline]
    fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

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
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_acknowledged as u32);

        if self.in_recovery(newest_acked_time_sent) {
            return;
        }

        if self.is_slow_start() {
            self.congestion_window = self
                .congestion_window
                .saturating_add(bytes_acknowledged as u32);

            if self
                .hybrid_slow_start
                .on_rtt_sample(newest_acked_time_sent, rtt.latest_rtt())
            {
                self.slow_start_threshold = self.congestion_window;
                self.w_max = self.congestion_window as f64;
                self.k = Duration::ZERO;
            }
            return;
        }

        let start = *self.avoidance_start.get_or_insert(now);
        let t = now.saturating_duration_since(start);

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.2
        //# W_est(t) = W_max*beta_cubic +
        //#            [3*(1-beta_cubic)/(1+beta_cubic)] *
        //#            (t/RTT) (Eq. 4)
        let beta = BETA.to_f64().unwrap_or(0.7);
        let srtt = rtt.smoothed_rtt().as_secs_f64().max(0.000_001);
        let reno_growth = 3.0 * (1.0 - beta) / (1.0 + beta);
        self.w_est = self.w_max * beta + reno_growth * (t.as_secs_f64() / srtt) * self.mds();

        let target = self.w_cubic(t);

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.2
        //# When receiving an ACK in congestion avoidance, ... CUBIC checks
        //# whether W_cubic(t) is less than W_est(t).  If so, CUBIC is in the
        //# TCP-friendly region and cwnd SHOULD be set to W_est(t) at each
        //# reception of an ACK.
        let target = target.max(self.w_est);

        if target > self.congestion_window as f64 {
            // approach the cubic target over roughly one RTT of ACKs
            let growth = (target - self.congestion_window as f64)
                * (bytes_acknowledged as f64 / self.congestion_window.max(1) as f64);
            let growth = growth.min(self.mds() * (bytes_acknowledged as f64 / self.mds()));
            self.congestion_window =
                (self.congestion_window as f64 + growth.max(0.0)) as u32;
        }
    }

    fn on_loss(&mut self, lost_bytes: usize, newest_lost_time_sent: Timestamp, now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes as u32);
        self.on_congestion_event(newest_lost_time_sent, now);
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = minimum_window(self.max_datagram_size);
        self.slow_start_threshold = u32::MAX;
        self.recovery_start_time = None;
        self.w_max = 0.0;
        self.w_est = 0.0;
        self.k = Duration::ZERO;
        self.avoidance_start = None;
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
        Bandwidth::new(self.congestion_window as u64, Duration::from_secs(1))
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

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn rtt_100ms() -> RttEstimator {
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            at(1),
            false,
            crate::packet::number::PacketNumberSpace::ApplicationData,
        );
        rtt
    }

    //= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
    //# K = cubic_root(W_max*(1-beta_cubic)/C) (Eq. 2)
    #[test]
    fn k_follows_rfc_formula() {
        let mut cc = Cubic::new(1200);
        // w_max of 100 segments: K = cbrt(100·0.3/0.4) = cbrt(75) ≈ 4.217s
        cc.w_max = 100.0 * 1200.0;
        let k = cc.compute_k();
        assert!((k.as_secs_f64() - 4.217).abs() < 0.01, "K = {k:?}");
    }

    #[test]
    fn loss_multiplies_by_beta() {
        let mut cc = Cubic::new(1200);
        let initial = cc.congestion_window();
        cc.on_packet_sent(at(0), 1200, &rtt_100ms());
        cc.on_loss(1200, at(0), at(100));
        assert_eq!(cc.congestion_window(), (initial as f64 * 0.7) as u32);
        assert!(!cc.is_slow_start());
    }

    #[test]
    fn window_regrows_toward_w_max() {
        let mut cc = Cubic::new(1200);
        let rtt = rtt_100ms();
        cc.on_packet_sent(at(0), 1200, &rtt);
        cc.on_loss(1200, at(0), at(100));
        let reduced = cc.congestion_window();

        // feed a stream of ACKs over simulated seconds; the window climbs
        let mut now = 200u64;
        for _ in 0..200 {
            cc.on_packet_sent(at(now), 1200, &rtt);
            cc.on_ack(at(now), 1200, &rtt, at(now + 100));
            now += 100;
        }
        assert!(cc.congestion_window() > reduced);
    }

    #[test]
    fn fast_convergence_reduces_w_max() {
        let mut cc = Cubic::new(1200);
        cc.w_max = (cc.congestion_window * 2) as f64;

        cc.on_packet_sent(at(0), 1200, &rtt_100ms());
        cc.on_loss(1200, at(0), at(100));
        // current window below prior w_max engages fast convergence
        assert!(cc.w_max < (initial_window(1200) * 2) as f64);
    }

    #[test]
    fn persistent_congestion_resets() {
        let mut cc = Cubic::new(1200);
        cc.on_packet_sent(at(0), 4800, &rtt_100ms());
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), minimum_window(1200));
        assert!(cc.is_slow_start());
    }
}
