// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{Bandwidth, RttEstimator},
    time::Timestamp,
};
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# A perfectly paced sender spreads packets exactly evenly over time.

/// Interval-based pacer shared by the window-based controllers.
///
/// Transmission is released in bursts of `burst_size` datagrams; each
/// burst sets the earliest departure time for the next one based on the
/// current pacing rate.
#[derive(Clone, Debug, Default)]
pub struct Pacer {
    earliest_departure_time: Option<Timestamp>,
    /// Bytes still allowed in the current burst
    burst_budget: u64,
}

/// Datagrams released per burst, matching the initial congestion window
const BURST_SIZE: u64 = 10;

/// N = 2 in slow start to stay ahead of the doubling window, 1.25 after
const SLOW_START_NUMERATOR: u64 = 8;
const PACING_NUMERATOR: u64 = 5;
const PACING_DENOMINATOR: u64 = 4;

impl Pacer {
    /// The pacing rate for a window-based controller
    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
    //# rate = N * congestion_window / smoothed_rtt
    #[inline]
    pub fn rate(
        congestion_window: u32,
        rtt: &RttEstimator,
        in_slow_start: bool,
    ) -> Bandwidth {
        let numerator = if in_slow_start {
            SLOW_START_NUMERATOR
        } else {
            PACING_NUMERATOR
        };
        Bandwidth::new(congestion_window as u64, rtt.smoothed_rtt())
            .scale(numerator, PACING_DENOMINATOR)
    }

    /// Records a transmission of `bytes`, advancing the departure gate
    pub fn on_packet_sent(
        &mut self,
        now: Timestamp,
        bytes: usize,
        rate: Bandwidth,
        max_datagram_size: u16,
    ) {
        if self.burst_budget >= bytes as u64 {
            self.burst_budget -= bytes as u64;
            return;
        }

        let interval = rate.transfer_time(BURST_SIZE * max_datagram_size as u64);
        let base = match self.earliest_departure_time {
            Some(edt) if edt > now => edt,
            _ => now,
        };
        self.earliest_departure_time = Some(base + interval.min(MAX_INTERVAL));
        self.burst_budget = BURST_SIZE * max_datagram_size as u64;
    }

    /// Returns the earliest time the next packet may depart
    #[inline]
    pub fn earliest_departure_time(&self) -> Option<Timestamp> {
        self.earliest_departure_time
    }

    /// Returns true if a packet may be sent at `now`
    #[inline]
    pub fn can_send(&self, now: Timestamp) -> bool {
        match self.earliest_departure_time {
            Some(edt) => edt.has_elapsed(now),
            None => true,
        }
    }
}

/// A hung clock must not park the connection forever
const MAX_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;

    fn at(micros: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_micros(micros))
    }

    #[test]
    fn initial_burst_is_ungated() {
        let pacer = Pacer::default();
        assert!(pacer.can_send(at(1)));
    }

    #[test]
    fn departure_gate_advances_with_rate() {
        let mut pacer = Pacer::default();
        let rate = Bandwidth::new(12_000_000, Duration::from_secs(1));

        pacer.on_packet_sent(at(1), 1200, rate, 1200);
        let edt = pacer.earliest_departure_time().unwrap();
        // 12000 bytes at 12MB/s is a 1ms burst interval
        assert_eq!(edt, at(1) + Duration::from_millis(1));
        assert!(!pacer.can_send(at(2)));
        assert!(pacer.can_send(at(1001)));

        // the following burst budget absorbs sends without advancing the gate
        pacer.on_packet_sent(at(1001), 1200, rate, 1200);
        assert_eq!(pacer.earliest_departure_time().unwrap(), edt);
    }

    #[test]
    fn slow_start_rate_is_faster() {
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            at(1_000_000),
            false,
            crate::packet::number::PacketNumberSpace::ApplicationData,
        );
        let slow = Pacer::rate(120_000, &rtt, true);
        let avoid = Pacer::rate(120_000, &rtt, false);
        assert_eq!(slow.bytes_per_second(), 2_400_000);
        assert_eq!(avoid.bytes_per_second(), 1_500_000);
    }
}
