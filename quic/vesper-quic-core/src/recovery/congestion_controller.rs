// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{bbr::Bbr, cubic::Cubic, new_reno::NewReno, Bandwidth, RttEstimator},
    time::Timestamp,
};
use core::fmt::Debug;

/// The congestion control algorithms selectable per connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    NewReno,
    Cubic,
    Bbr,
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion window of ten times the
//# maximum datagram size (max_datagram_size), while limiting the window
//# to the larger of 14,720 bytes or twice the maximum datagram size.
#[inline]
pub const fn initial_window(max_datagram_size: u16) -> u32 {
    let mds = max_datagram_size as u32;
    let upper = if 14_720 > 2 * mds { 14_720 } else { 2 * mds };
    if 10 * mds < upper {
        10 * mds
    } else {
        upper
    }
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# The RECOMMENDED value is 2 * max_datagram_size.
#[inline]
pub const fn minimum_window(max_datagram_size: u16) -> u32 {
    2 * max_datagram_size as u32
}

/// The common contract every congestion controller implements.
///
/// Bytes-in-flight accounting lives inside the controller so the
/// invariant `bytes_in_flight <= congestion_window` can be checked at
/// every decision point without consulting a second structure. ACK-only
/// packets are sent with `bytes = 0` and bypass the accounting entirely.
pub trait CongestionController: 'static + Send + Debug {
    fn congestion_window(&self) -> u32;

    fn bytes_in_flight(&self) -> u32;

    fn is_slow_start(&self) -> bool;

    /// Returns true if the window has no room for another full datagram
    #[inline]
    fn is_congestion_limited(&self) -> bool {
        self.congestion_window() < self.bytes_in_flight() + self.max_datagram_size() as u32
    }

    fn max_datagram_size(&self) -> u16;

    fn on_packet_sent(&mut self, time_sent: Timestamp, bytes: usize, rtt: &RttEstimator);

    /// Invoked once per ACK frame with the cumulative newly acked bytes;
    /// `newest_acked_time_sent` is the send time of the largest newly
    /// acked packet
    fn on_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt: &RttEstimator,
        now: Timestamp,
    );

    /// Invoked per loss event; `newest_lost_time_sent` drives the
    /// recovery-period check
    fn on_loss(&mut self, lost_bytes: usize, newest_lost_time_sent: Timestamp, now: Timestamp);

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
    //# When persistent congestion is declared, the sender's congestion
    //# window MUST be reduced to the minimum congestion window
    //# (kMinimumWindow)
    fn on_persistent_congestion(&mut self);

    /// Invoked when an ACK reports an increased ECN-CE count
    fn on_ecn_ce(&mut self, ce_increase: u64, now: Timestamp);

    /// Invoked when a tracked packet is dropped without an acknowledgment
    /// or loss verdict, e.g. on key discard
    fn on_packet_discarded(&mut self, bytes: usize);

    fn pacing_rate(&self) -> Bandwidth;

    /// The number of bytes that may be sent at `now`, combining window
    /// space and pacing
    fn can_send(&self, now: Timestamp) -> usize;
}

/// Runtime-selected congestion controller.
///
/// Algorithm dispatch is a plain enum match: the variant is chosen once
/// at connection start and never changes, and no per-packet virtual call
/// is involved.
#[derive(Debug)]
pub enum Controller {
    NewReno(NewReno),
    Cubic(Cubic),
    Bbr(Bbr),
}

impl Controller {
    pub fn new(algorithm: Algorithm, max_datagram_size: u16) -> Self {
        match algorithm {
            Algorithm::NewReno => Self::NewReno(NewReno::new(max_datagram_size)),
            Algorithm::Cubic => Self::Cubic(Cubic::new(max_datagram_size)),
            Algorithm::Bbr => Self::Bbr(Bbr::new(max_datagram_size)),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident ( $($arg:expr),* )) => {
        match $self {
            Controller::NewReno(controller) => controller.$method($($arg),*),
            Controller::Cubic(controller) => controller.$method($($arg),*),
            Controller::Bbr(controller) => controller.$method($($arg),*),
        }
    };
}

impl CongestionController for Controller {
    #[inline]
    fn congestion_window(&self) -> u32 {
        dispatch!(self, congestion_window())
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        dispatch!(self, bytes_in_flight())
    }

    #[inline]
    fn is_slow_start(&self) -> bool {
        dispatch!(self, is_slow_start())
    }

    #[inline]
    fn max_datagram_size(&self) -> u16 {
        dispatch!(self, max_datagram_size())
    }

    #[inline]
    fn on_packet_sent(&mut self, time_sent: Timestamp, bytes: usize, rtt: &RttEstimator) {
        dispatch!(self, on_packet_sent(time_sent, bytes, rtt))
    }

    #[inline]
    fn on_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt: &RttEstimator,
        now: Timestamp,
    ) {
        dispatch!(
            self,
            on_ack(newest_acked_time_sent, bytes_acknowledged, rtt, now)
        )
    }

    #[inline]
    fn on_loss(&mut self, lost_bytes: usize, newest_lost_time_sent: Timestamp, now: Timestamp) {
        dispatch!(self, on_loss(lost_bytes, newest_lost_time_sent, now))
    }

    #[inline]
    fn on_persistent_congestion(&mut self) {
        dispatch!(self, on_persistent_congestion())
    }

    #[inline]
    fn on_ecn_ce(&mut self, ce_increase: u64, now: Timestamp) {
        dispatch!(self, on_ecn_ce(ce_increase, now))
    }

    #[inline]
    fn on_packet_discarded(&mut self, bytes: usize) {
        dispatch!(self, on_packet_discarded(bytes))
    }

    #[inline]
    fn pacing_rate(&self) -> Bandwidth {
        dispatch!(self, pacing_rate())
    }

    #[inline]
    fn can_send(&self, now: Timestamp) -> usize {
        dispatch!(self, can_send(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds() {
        assert_eq!(initial_window(1200), 12_000);
        assert_eq!(initial_window(1472), 14_720);
        assert_eq!(initial_window(9000), 18_000);
        assert_eq!(minimum_window(1200), 2400);
    }

    #[test]
    fn selection() {
        for algorithm in [Algorithm::NewReno, Algorithm::Cubic, Algorithm::Bbr] {
            let controller = Controller::new(algorithm, 1200);
            assert!(controller.congestion_window() >= minimum_window(1200));
            assert_eq!(controller.bytes_in_flight(), 0);
            assert!(controller.is_slow_start());
            assert!(!controller.is_congestion_limited());
        }
    }
}
