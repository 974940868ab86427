// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loss recovery and congestion control.
//!
//! The per-space loss-detection managers live in the transport crate;
//! this module owns the pure state machines: RTT estimation, the sent
//! packet map, PTO backoff, and the congestion controllers.

pub mod bandwidth;
pub mod bbr;
pub mod congestion_controller;
pub mod cubic;
pub mod hybrid_slow_start;
pub mod new_reno;
pub mod pacing;
pub mod pto;
pub mod rtt_estimator;
pub mod sent_packets;

pub use bandwidth::Bandwidth;
pub use congestion_controller::{Algorithm, CongestionController, Controller};
pub use pto::Pto;
pub use rtt_estimator::RttEstimator;
pub use sent_packets::{SentPacketInfo, SentPackets};

use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED initial value for the packet reordering threshold
//# (kPacketThreshold) is 3, based on best practices for TCP loss
//# detection [RFC5681] [RFC6675].
pub const K_PACKET_THRESHOLD: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the timer granularity (kGranularity) is 1
//# millisecond.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
//# The RECOMMENDED value for kPersistentCongestionThreshold is 3, which
//# results in behavior that is approximately equivalent to a TCP sender
//# declaring an RTO after two TLPs.
pub const K_PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

/// Loss delay multiplier: max(9/8 · max(smoothed_rtt, latest_rtt), granularity)
//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED time threshold (kTimeThreshold), expressed as an
//# RTT multiplier, is 9/8.
#[inline]
pub fn loss_delay(rtt: &RttEstimator) -> Duration {
    let base = rtt.smoothed_rtt().max(rtt.latest_rtt());
    (base + base / 8).max(K_GRANULARITY)
}
