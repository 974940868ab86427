// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A BBRv2-style model-based controller.
//!
//! The model tracks the bottleneck bandwidth (windowed max of delivery
//! rate) and the round-trip propagation delay (windowed min RTT). The
//! state machine cycles Startup → Drain → ProbeBW, periodically visiting
//! ProbeRTT to refresh the min-RTT estimate with a drained pipe.

pub mod windowed_filter;

use crate::{
    recovery::{
        congestion_controller::{initial_window, minimum_window, CongestionController},
        Bandwidth, RttEstimator,
    },
    time::{Timer, Timestamp},
};
use core::time::Duration;
use num_rational::Ratio;
use windowed_filter::WindowedMaxFilter;

/// Startup/Drain pacing gain of 2.77 (derived from 2/ln(2))
const STARTUP_PACING_GAIN: Ratio<u64> = Ratio::new_raw(277, 100);
const DRAIN_PACING_GAIN: Ratio<u64> = Ratio::new_raw(100, 277);
const CWND_GAIN: Ratio<u64> = Ratio::new_raw(2, 1);

/// The ProbeBW pacing gain cycle
const PROBE_BW_CYCLE: [Ratio<u64>; 8] = [
    Ratio::new_raw(5, 4),
    Ratio::new_raw(3, 4),
    Ratio::new_raw(1, 1),
    Ratio::new_raw(1, 1),
    Ratio::new_raw(1, 1),
    Ratio::new_raw(1, 1),
    Ratio::new_raw(1, 1),
    Ratio::new_raw(1, 1),
];

/// The bottleneck bandwidth filter window
const BTL_BW_WINDOW: Duration = Duration::from_secs(10);

/// ProbeRTT cadence and duration
const PROBE_RTT_INTERVAL: Duration = Duration::from_secs(10);
const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// ProbeRTT floor of four packets
const PROBE_RTT_CWND_PACKETS: u32 = 4;

/// Startup exits when bandwidth grows less than 25% across three rounds
const FULL_PIPE_GROWTH_NUMERATOR: u64 = 5;
const FULL_PIPE_GROWTH_DENOMINATOR: u64 = 4;
const FULL_PIPE_ROUNDS: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Startup,
    Drain,
    ProbeBw { cycle_index: usize },
    ProbeRtt,
}

#[derive(Debug)]
pub struct Bbr {
    max_datagram_size: u16,
    bytes_in_flight: u32,
    congestion_window: u32,
    state: State,

    btl_bw: WindowedMaxFilter<Bandwidth>,
    /// Round-trip propagation estimate and when it was last refreshed
    rt_prop: Duration,
    rt_prop_stamp: Option<Timestamp>,

    /// Delivery accounting for rate samples
    last_ack_time: Option<Timestamp>,

    /// Full-pipe detection state
    full_pipe_bw: Bandwidth,
    full_pipe_rounds: u8,
    filled_pipe: bool,

    /// ProbeBW cycle advance marker
    cycle_stamp: Option<Timestamp>,

    probe_rtt_timer: Timer,
    /// Window to restore when leaving ProbeRTT
    saved_congestion_window: u32,

    /// Highest inflight level that survived loss, used as a soft ceiling
    inflight_hi: Option<u32>,
}

impl Bbr {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            bytes_in_flight: 0,
            congestion_window: initial_window(max_datagram_size),
            state: State::Startup,
            btl_bw: WindowedMaxFilter::new(BTL_BW_WINDOW),
            rt_prop: Duration::MAX,
            rt_prop_stamp: None,
            last_ack_time: None,
            full_pipe_bw: Bandwidth::ZERO,
            full_pipe_rounds: 0,
            filled_pipe: false,
            cycle_stamp: None,
            probe_rtt_timer: Timer::default(),
            saved_congestion_window: 0,
            inflight_hi: None,
        }
    }

    #[inline]
    fn pacing_gain(&self) -> Ratio<u64> {
        match self.state {
            State::Startup => STARTUP_PACING_GAIN,
            State::Drain => DRAIN_PACING_GAIN,
            State::ProbeBw { cycle_index } => PROBE_BW_CYCLE[cycle_index % PROBE_BW_CYCLE.len()],
            State::ProbeRtt => Ratio::new_raw(1, 1),
        }
    }

    /// The bandwidth-delay product of the current model
    fn bdp(&self) -> u32 {
        let Some(bw) = self.btl_bw.best() else {
            return initial_window(self.max_datagram_size);
        };
        if self.rt_prop == Duration::MAX {
            return initial_window(self.max_datagram_size);
        }
        (bw * self.rt_prop).min(u32::MAX as u64) as u32
    }

    fn update_model(&mut self, bytes_acknowledged: usize, rtt: &RttEstimator, now: Timestamp) {
        // round-trip propagation: monotonic minimum, refreshed only by
        // equal-or-lower samples or while ProbeRTT drains the pipe
        let refresh = self.rt_prop == Duration::MAX
            || rtt.latest_rtt() <= self.rt_prop
            || matches!(self.state, State::ProbeRtt);
        if refresh {
            self.rt_prop = rtt.latest_rtt();
            self.rt_prop_stamp = Some(now);
        }

        // delivery rate sample since the previous ACK
        if let Some(last) = self.last_ack_time {
            let elapsed = now.saturating_duration_since(last);
            if !elapsed.is_zero() {
                let sample = Bandwidth::new(bytes_acknowledged as u64, elapsed);
                self.btl_bw.update(sample, now);
            }
        }
        self.last_ack_time = Some(now);

        self.check_full_pipe();
    }

    //= https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control#section-4.3.1.2
    //# BBR estimates that the pipe is full ... if the bottleneck bandwidth
    //# estimate has not grown by at least 25 percent across three
    //# non-app-limited rounds.
    fn check_full_pipe(&mut self) {
        if self.filled_pipe {
            return;
        }
        let Some(bw) = self.btl_bw.best() else { return };

        let threshold = self
            .full_pipe_bw
            .scale(FULL_PIPE_GROWTH_NUMERATOR, FULL_PIPE_GROWTH_DENOMINATOR);
        if bw > threshold {
            self.full_pipe_bw = bw;
            self.full_pipe_rounds = 0;
            return;
        }

        self.full_pipe_rounds += 1;
        if self.full_pipe_rounds >= FULL_PIPE_ROUNDS {
            self.filled_pipe = true;
        }
    }

    fn advance_state(&mut self, now: Timestamp) {
        match self.state {
            State::Startup => {
                if self.filled_pipe {
                    self.state = State::Drain;
                }
            }
            State::Drain => {
                // drain until inflight falls to the BDP
                if self.bytes_in_flight <= self.bdp() {
                    self.state = State::ProbeBw { cycle_index: 0 };
                    self.cycle_stamp = Some(now);
                }
            }
            State::ProbeBw { cycle_index } => {
                // advance the gain cycle once per rt_prop
                let interval = if self.rt_prop == Duration::MAX {
                    PROBE_RTT_DURATION
                } else {
                    self.rt_prop
                };
                let advance = self
                    .cycle_stamp
                    .map_or(true, |stamp| now.saturating_duration_since(stamp) >= interval);
                if advance {
                    self.state = State::ProbeBw {
                        cycle_index: (cycle_index + 1) % PROBE_BW_CYCLE.len(),
                    };
                    self.cycle_stamp = Some(now);
                }

                //= https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control#section-4.3.4
                //# if the BBR.min_rtt estimate has not been updated by a low RTT
                //# measurement for more than 10 seconds, then BBR enters ProbeRTT
                let stale = self
                    .rt_prop_stamp
                    .map_or(false, |stamp| {
                        now.saturating_duration_since(stamp) > PROBE_RTT_INTERVAL
                    });
                if stale {
                    self.enter_probe_rtt(now);
                }
            }
            State::ProbeRtt => {
                if self.probe_rtt_timer.poll_expiration(now).is_ready() {
                    self.congestion_window = self
                        .saved_congestion_window
                        .max(minimum_window(self.max_datagram_size));
                    self.rt_prop_stamp = Some(now);
                    self.state = if self.filled_pipe {
                        self.cycle_stamp = Some(now);
                        State::ProbeBw { cycle_index: 0 }
                    } else {
                        State::Startup
                    };
                }
            }
        }
    }

    fn enter_probe_rtt(&mut self, now: Timestamp) {
        self.saved_congestion_window = self.congestion_window;
        self.congestion_window =
            (PROBE_RTT_CWND_PACKETS * self.max_datagram_size as u32)
                .max(minimum_window(self.max_datagram_size));
        self.probe_rtt_timer.set(now + PROBE_RTT_DURATION);
        self.state = State::ProbeRtt;
    }

    fn update_congestion_window(&mut self) {
        if matches!(self.state, State::ProbeRtt) {
            return;
        }

        let bdp = self.bdp();
        let gained = (CWND_GAIN * bdp as u64).to_integer();

        // headroom of three datagrams absorbs ack aggregation
        let headroom = 3 * self.max_datagram_size as u32;
        let mut window = (gained.min(u32::MAX as u64) as u32).saturating_add(headroom);

        if let Some(hi) = self.inflight_hi {
            window = window.min(hi);
        }

        self.congestion_window = window.max(minimum_window(self.max_datagram_size));
    }
}

impl CongestionController for Bbr {
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
        matches!(self.state, State::Startup)
    }

    #[inline]
    fn max_datagram_size(&self) -> u16 {
        self.max_datagram_size
    }

    fn on_packet_sent(&mut self, _time_sent: Timestamp, bytes: usize, _rtt: &RttEstimator) {
        if bytes == 0 {
            return;
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(bytes as u32);
    }

    fn on_ack(
        &mut self,
        _newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt: &RttEstimator,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_acknowledged as u32);
        self.update_model(bytes_acknowledged, rtt, now);
        self.advance_state(now);
        self.update_congestion_window();
    }

    fn on_loss(&mut self, lost_bytes: usize, _newest_lost_time_sent: Timestamp, now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes as u32);

        //= https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control#section-4.2.4
        //# BBR.inflight_hi: the long-term maximum volume of in-flight data
        //# that the algorithm estimates will produce acceptable queue
        //# pressure
        let ceiling = self
            .bytes_in_flight
            .saturating_add(lost_bytes as u32)
            .max(minimum_window(self.max_datagram_size));
        self.inflight_hi = Some(match self.inflight_hi {
            Some(hi) => hi.min(ceiling),
            None => ceiling,
        });
        self.advance_state(now);
        self.update_congestion_window();
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = minimum_window(self.max_datagram_size);
        self.inflight_hi = None;
        self.filled_pipe = false;
        self.full_pipe_bw = Bandwidth::ZERO;
        self.full_pipe_rounds = 0;
        self.state = State::Startup;
    }

    fn on_ecn_ce(&mut self, _ce_increase: u64, now: Timestamp) {
        // treat CE like a mild loss signal against the inflight ceiling
        let ceiling = self
            .bytes_in_flight
            .max(minimum_window(self.max_datagram_size));
        self.inflight_hi = Some(match self.inflight_hi {
            Some(hi) => hi.min(ceiling),
            None => ceiling,
        });
        self.advance_state(now);
        self.update_congestion_window();
    }

    fn on_packet_discarded(&mut self, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u32);
    }

    fn pacing_rate(&self) -> Bandwidth {
        let Some(bw) = self.btl_bw.best() else {
            // before any estimate exists, pace off the initial window at
            // the initial RTT assumption
            return Bandwidth::new(
                initial_window(self.max_datagram_size) as u64,
                crate::recovery::rtt_estimator::DEFAULT_INITIAL_RTT,
            );
        };
        let gain = self.pacing_gain();
        bw.scale(*gain.numer(), *gain.denom())
    }

    fn can_send(&self, _now: Timestamp) -> usize {
        self.congestion_window.saturating_sub(self.bytes_in_flight) as usize
    }
}
