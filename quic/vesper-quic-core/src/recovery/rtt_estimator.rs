// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{packet::number::PacketNumberSpace, time::Timestamp};
use core::{
    cmp::{max, min},
    time::Duration,
};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333 milliseconds.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

/// The lowest RTT value the estimator tracks
pub const MIN_RTT: Duration = Duration::from_micros(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    latest_rtt: Duration,
    /// Monotonic floor over the lifetime of the path
    min_rtt: Duration,
    /// Exponentially weighted moving average
    smoothed_rtt: Duration,
    /// Mean deviation of samples from the smoothed value
    rttvar: Duration,
    /// The peer's max_ack_delay transport parameter, honored once the
    /// handshake is confirmed
    max_ack_delay: Duration,
    first_rtt_sample: Option<Timestamp>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTT)
    }
}

impl RttEstimator {
    #[inline]
    pub fn new(initial_rtt: Duration) -> Self {
        let initial_rtt = initial_rtt.max(MIN_RTT);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = kInitialRtt
        //# rttvar = kInitialRtt / 2
        Self {
            latest_rtt: initial_rtt,
            min_rtt: initial_rtt,
            smoothed_rtt: initial_rtt,
            rttvar: initial_rtt / 2,
            max_ack_delay: Duration::ZERO,
            first_rtt_sample: None,
        }
    }

    /// Seeds a fresh estimator for a new path, retaining `max_ack_delay`
    pub fn for_new_path(&self, initial_rtt: Duration) -> Self {
        Self {
            max_ack_delay: self.max_ack_delay,
            ..Self::new(initial_rtt)
        }
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    #[inline]
    pub fn first_rtt_sample(&self) -> Option<Timestamp> {
        self.first_rtt_sample
    }

    /// Applies the peer's max_ack_delay transport parameter
    pub fn on_max_ack_delay(&mut self, max_ack_delay: Duration) {
        self.max_ack_delay = max_ack_delay;
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
    #[inline]
    pub fn pto_period(&self, pto_backoff: u32, space: PacketNumberSpace) -> Duration {
        let mut period = self.smoothed_rtt;
        period += max(4 * self.rttvar, super::K_GRANULARITY);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When the PTO is armed for Initial or Handshake packet number
        //# spaces, the max_ack_delay in the PTO period computation is set to
        //# 0, since the peer is expected to not delay these packets
        //# intentionally; see Section 13.2.1 of [QUIC-TRANSPORT].
        if space.is_application_data() {
            period += self.max_ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# Even when there are ack-eliciting packets in flight in multiple
        //# packet number spaces, the exponential increase in PTO occurs
        //# across all spaces to prevent excess load on the network.
        period * pto_backoff
    }

    /// Updates the estimate from a newly acknowledged packet's RTT sample
    #[inline]
    pub fn update_rtt(
        &mut self,
        mut ack_delay: Duration,
        rtt_sample: Duration,
        now: Timestamp,
        is_handshake_confirmed: bool,
        space: PacketNumberSpace,
    ) {
        self.latest_rtt = rtt_sample.max(MIN_RTT);

        if self.first_rtt_sample.is_none() {
            self.first_rtt_sample = Some(now);

            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
            //# min_rtt MUST be set to the latest_rtt on the first RTT sample.
            self.min_rtt = self.latest_rtt;

            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# smoothed_rtt = latest_rtt
            //# rttvar = latest_rtt / 2
            self.smoothed_rtt = self.latest_rtt;
            self.rttvar = self.latest_rtt / 2;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the lesser of min_rtt and latest_rtt
        //# (Section 5.1) on all other samples.
        self.min_rtt = min(self.min_rtt, self.latest_rtt);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MAY ignore the acknowledgment delay for Initial packets, since
        //#    these acknowledgments are not delayed by the peer (Section
        //#    13.2.1 of [QUIC-TRANSPORT]);
        if space.is_initial() {
            ack_delay = Duration::ZERO;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  SHOULD ignore the peer's max_ack_delay until the handshake is
        //#    confirmed;
        if is_handshake_confirmed {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# *  MUST limit the acknowledgment delay by max_ack_delay after
            //#    the handshake is confirmed;
            ack_delay = min(ack_delay, self.max_ack_delay);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgment delay from the RTT sample
        //#    if the resulting value is smaller than the min_rtt.
        let mut adjusted_rtt = self.latest_rtt;
        if adjusted_rtt >= self.min_rtt + ack_delay {
            adjusted_rtt -= ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        let rttvar_sample = if self.smoothed_rtt > adjusted_rtt {
            self.smoothed_rtt - adjusted_rtt
        } else {
            adjusted_rtt - self.smoothed_rtt
        };
        self.rttvar = (3 * self.rttvar + rttvar_sample) / 4;
        self.smoothed_rtt = (7 * self.smoothed_rtt + adjusted_rtt) / 8;
    }

    /// The span a contiguous loss run must exceed to signal persistent
    /// congestion
    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
    //# (smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay) *
    //#     kPersistentCongestionThreshold
    #[inline]
    pub fn persistent_congestion_duration(&self) -> Duration {
        (self.smoothed_rtt + max(4 * self.rttvar, super::K_GRANULARITY) + self.max_ack_delay)
            * super::K_PERSISTENT_CONGESTION_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn first_sample_seeds_everything() {
        let mut rtt = RttEstimator::default();
        assert_eq!(rtt.smoothed_rtt(), DEFAULT_INITIAL_RTT);

        rtt.update_rtt(
            Duration::from_millis(10),
            Duration::from_millis(100),
            at(1000),
            false,
            PacketNumberSpace::Initial,
        );
        assert_eq!(rtt.latest_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.min_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.rttvar(), Duration::from_millis(50));
    }

    #[test]
    fn ewma_follows_rfc_weights() {
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(80),
            at(1000),
            false,
            PacketNumberSpace::ApplicationData,
        );
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(160),
            at(1100),
            false,
            PacketNumberSpace::ApplicationData,
        );

        // smoothed = 7/8·80 + 1/8·160 = 90
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(90));
        // rttvar = 3/4·40 + 1/4·|80−160| = 50
        assert_eq!(rtt.rttvar(), Duration::from_millis(50));
        assert_eq!(rtt.min_rtt(), Duration::from_millis(80));
    }

    #[test]
    fn ack_delay_not_subtracted_below_min_rtt() {
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            at(1000),
            true,
            PacketNumberSpace::ApplicationData,
        );
        rtt.on_max_ack_delay(Duration::from_millis(25));

        // a sample equal to min_rtt cannot absorb any ack delay
        rtt.update_rtt(
            Duration::from_millis(20),
            Duration::from_millis(100),
            at(1100),
            true,
            PacketNumberSpace::ApplicationData,
        );
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn pto_period_scales() {
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            at(1000),
            false,
            PacketNumberSpace::ApplicationData,
        );
        rtt.on_max_ack_delay(Duration::from_millis(25));

        // srtt + max(4·rttvar, 1ms) = 100 + 200 = 300, plus max_ack_delay in
        // the application space
        assert_eq!(
            rtt.pto_period(1, PacketNumberSpace::Handshake),
            Duration::from_millis(300)
        );
        assert_eq!(
            rtt.pto_period(1, PacketNumberSpace::ApplicationData),
            Duration::from_millis(325)
        );
        assert_eq!(
            rtt.pto_period(2, PacketNumberSpace::Handshake),
            Duration::from_millis(600)
        );
    }

    #[test]
    fn min_rtt_is_monotonic_floor() {
        let mut rtt = RttEstimator::default();
        for sample in [100u64, 50, 80, 200, 60] {
            rtt.update_rtt(
                Duration::ZERO,
                Duration::from_millis(sample),
                at(1000 + sample),
                false,
                PacketNumberSpace::ApplicationData,
            );
        }
        assert_eq!(rtt.min_rtt(), Duration::from_millis(50));
    }
}
