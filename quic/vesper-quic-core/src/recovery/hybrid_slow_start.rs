// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9406#section-4
//# HyStart++ uses delay increase as a signal to exit slow start before
//# any packet loss occurs.

/// HyStart++ incipient-queueing detection.
///
/// Acknowledged packets are grouped into rounds spanning roughly one RTT
/// of send time. Each round's minimum RTT is compared against the
/// previous round's; an increase beyond the computed threshold, observed
/// after enough samples, exits slow start before the first loss.
#[derive(Clone, Debug, Default)]
pub struct HybridSlowStart {
    /// Send-time upper bound of the current round
    round_end: Option<Timestamp>,
    /// Minimum RTT observed in the current round
    current_round_min_rtt: Option<Duration>,
    /// Minimum RTT observed in the previous round
    last_round_min_rtt: Option<Duration>,
    /// Samples counted toward the current round's minimum
    rtt_sample_count: u32,
    exited: bool,
}

/// Samples per round before the delay check applies (N_RTT_SAMPLE)
const N_RTT_SAMPLE: u32 = 8;

//= https://www.rfc-editor.org/rfc/rfc9406#section-4.2
//# MIN_RTT_THRESH = 4 msec
const K_MIN_DELAY: Duration = Duration::from_millis(4);

//= https://www.rfc-editor.org/rfc/rfc9406#section-4.2
//# MAX_RTT_THRESH = 16 msec
const K_MAX_DELAY: Duration = Duration::from_millis(16);

impl HybridSlowStart {
    /// Feeds an RTT sample from an acknowledged packet.
    ///
    /// Returns true when slow start should end because queueing delay is
    /// building.
    pub fn on_rtt_sample(&mut self, time_sent: Timestamp, rtt_sample: Duration) -> bool {
        if self.exited {
            return false;
        }

        // a packet sent past the current round's window opens a new round
        let new_round = match self.round_end {
            Some(round_end) => time_sent > round_end,
            None => true,
        };
        if new_round {
            self.round_end = Some(time_sent + rtt_sample);
            self.last_round_min_rtt = self.current_round_min_rtt.take();
            self.rtt_sample_count = 0;
        }

        self.rtt_sample_count += 1;
        self.current_round_min_rtt = Some(match self.current_round_min_rtt {
            Some(min) => min.min(rtt_sample),
            None => rtt_sample,
        });

        if self.rtt_sample_count < N_RTT_SAMPLE {
            return false;
        }

        let (Some(current), Some(last)) = (self.current_round_min_rtt, self.last_round_min_rtt)
        else {
            return false;
        };

        // RttThresh = clamp(lastRoundMinRTT / 16, MIN_RTT_THRESH,
        // MAX_RTT_THRESH); the divisor is tighter than RFC 9406's 8 so
        // slow start is not abandoned on mild jitter
        let threshold = (last / 16).clamp(K_MIN_DELAY, K_MAX_DELAY);
        if current >= last + threshold {
            self.exited = true;
            return true;
        }

        false
    }

    /// A loss exits slow start through the normal path; stop watching
    pub fn on_congestion_event(&mut self) {
        self.exited = true;
    }

    /// Persistent congestion restarts slow start from scratch
    pub fn restart(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn has_exited(&self) -> bool {
        self.exited
    }
}
