// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-path state: addresses, validation, anti-amplification, RTT and
//! congestion control.

pub mod challenge;

pub use challenge::Challenge;

use crate::{
    inet::AddressPair,
    recovery::{CongestionController, Controller, RttEstimator},
    time::Timestamp,
};
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-14
//# QUIC MUST NOT be used if the network path cannot support a
//# maximum datagram size of at least 1200 bytes.
pub const MINIMUM_MAX_DATAGRAM_SIZE: u16 = 1200;

/// A small integer handle identifying a path within a connection.
///
/// Frames and events carry handles, never references into the path
/// table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u8);

impl Id {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "path[{}]", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Usable only within the amplification budget
    Pending,
    /// A PATH_RESPONSE proved two-way reachability
    Validated,
}

/// One network path and all state scoped to it.
///
/// Under multipath each path carries its own packet numbering, loss
/// recovery, and congestion state; the containing manager owns those
/// through this record.
#[derive(Debug)]
pub struct Path {
    pub id: Id,
    pub addresses: AddressPair,
    pub rtt_estimator: RttEstimator,
    pub congestion_controller: Controller,
    pub state: State,
    pub challenge: Challenge,

    /// Largest datagram size currently believed deliverable on this path
    max_datagram_size: u16,

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8
    //# an endpoint MUST limit the amount of data it sends to the
    //# unvalidated address to three times the amount of data received
    //# from that address.
    rx_bytes: u64,
    tx_bytes: u64,

    /// Consecutive PTO expirations without an acknowledgment; multipath
    /// marks the path suspect past a threshold
    pub pto_count: u32,
}

/// Consecutive PTOs after which a multipath scheduler skips the path
pub const SUSPECT_PTO_THRESHOLD: u32 = 3;

impl Path {
    pub fn new(
        id: Id,
        addresses: AddressPair,
        congestion_controller: Controller,
        rtt_estimator: RttEstimator,
    ) -> Self {
        Self {
            id,
            addresses,
            rtt_estimator,
            congestion_controller,
            state: State::Pending,
            challenge: Challenge::None,
            max_datagram_size: MINIMUM_MAX_DATAGRAM_SIZE,
            rx_bytes: 0,
            tx_bytes: 0,
            pto_count: 0,
        }
    }

    #[inline]
    pub fn is_validated(&self) -> bool {
        matches!(self.state, State::Validated)
    }

    /// Marks the path validated, lifting the amplification cap and the
    /// minimum datagram size clamp
    pub fn on_validated(&mut self, negotiated_max_datagram_size: u16) {
        self.state = State::Validated;
        self.challenge.on_validated();
        self.max_datagram_size = negotiated_max_datagram_size.max(MINIMUM_MAX_DATAGRAM_SIZE);
    }

    #[inline]
    pub fn on_bytes_received(&mut self, bytes: usize) {
        self.rx_bytes = self.rx_bytes.saturating_add(bytes as u64);
    }

    #[inline]
    pub fn on_bytes_transmitted(&mut self, bytes: usize) {
        self.tx_bytes = self.tx_bytes.saturating_add(bytes as u64);
    }

    /// The remaining anti-amplification allowance; unlimited once
    /// validated
    #[inline]
    pub fn amplification_allowance(&self) -> u64 {
        if self.is_validated() {
            return u64::MAX;
        }
        (self.rx_bytes * 3).saturating_sub(self.tx_bytes)
    }

    #[inline]
    pub fn at_amplification_limit(&self) -> bool {
        self.amplification_allowance() < self.max_datagram_size as u64
    }

    #[inline]
    pub fn max_datagram_size(&self) -> u16 {
        self.max_datagram_size
    }

    /// The transmission budget at `now`: congestion window space, capped
    /// by the amplification allowance
    pub fn transmission_budget(&self, now: Timestamp) -> usize {
        let window = self.congestion_controller.can_send(now);
        window.min(self.amplification_allowance().min(usize::MAX as u64) as usize)
    }

    /// Records a PTO expiration on this path
    #[inline]
    pub fn on_pto(&mut self) {
        self.pto_count += 1;
    }

    /// Any acknowledgment on the path clears the suspect counter
    #[inline]
    pub fn on_ack_received(&mut self) {
        self.pto_count = 0;
    }

    #[inline]
    pub fn is_suspect(&self) -> bool {
        self.pto_count > SUSPECT_PTO_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::Algorithm;
    use core::time::Duration;
    use std::net::SocketAddr;

    fn path() -> Path {
        let local: SocketAddr = "10.0.0.1:4433".parse().unwrap();
        let remote: SocketAddr = "192.0.2.1:443".parse().unwrap();
        Path::new(
            Id::ZERO,
            AddressPair::new(local, remote),
            Controller::new(Algorithm::NewReno, 1200),
            RttEstimator::default(),
        )
    }

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8
    //# an endpoint MUST limit the amount of data it sends to the
    //# unvalidated address to three times the amount of data received
    //# from that address.
    #[test]
    fn amplification_is_three_times_received() {
        let mut path = path();
        assert_eq!(path.amplification_allowance(), 0);
        assert!(path.at_amplification_limit());

        path.on_bytes_received(1200);
        assert_eq!(path.amplification_allowance(), 3600);

        path.on_bytes_transmitted(3000);
        assert_eq!(path.amplification_allowance(), 600);
        assert!(path.at_amplification_limit());

        path.on_bytes_received(1000);
        assert_eq!(path.amplification_allowance(), 3600);
    }

    #[test]
    fn validation_lifts_the_cap() {
        let mut path = path();
        path.on_bytes_transmitted(10_000);
        path.on_validated(1472);
        assert_eq!(path.amplification_allowance(), u64::MAX);
        assert!(!path.at_amplification_limit());
        assert_eq!(path.max_datagram_size(), 1472);
    }

    #[test]
    fn budget_caps_at_amplification() {
        let mut path = path();
        path.on_bytes_received(100);
        // cwnd is far larger, but the path only earned 300 bytes
        assert_eq!(path.transmission_budget(at(1)), 300);
    }

    #[test]
    fn suspect_after_consecutive_ptos() {
        let mut path = path();
        for _ in 0..SUSPECT_PTO_THRESHOLD {
            path.on_pto();
        }
        assert!(!path.is_suspect());
        path.on_pto();
        assert!(path.is_suspect());
        path.on_ack_received();
        assert!(!path.is_suspect());
    }
}
