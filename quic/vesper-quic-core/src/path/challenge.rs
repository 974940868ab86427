// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ct,
    frame::path_challenge::DATA_LEN,
    time::{Timer, Timestamp},
};
use core::time::Duration;

pub type Data = [u8; DATA_LEN];

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.1
//# An endpoint MAY send multiple PATH_CHALLENGE frames to guard against
//# packet loss.

/// An in-flight path validation challenge.
///
/// The challenge retransmits periodically until a matching
/// PATH_RESPONSE arrives on the same path or the abandon deadline
/// passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Challenge {
    #[default]
    None,
    Pending(State),
    Abandoned,
}

#[derive(Clone, Debug)]
pub struct State {
    data: Data,
    retransmit_timer: Timer,
    retransmit_period: Duration,
    abandon_timer: Timer,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        ct::constant_time_eq(&self.data, &other.data)
    }
}

impl Eq for State {}

impl Challenge {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.4
    //# Endpoints SHOULD abandon path validation based on a timer.  When
    //# setting this timer, implementations are cautioned that the new path
    //# could have a longer round-trip time than the original.  A value of
    //# three times the larger of the current PTO or the PTO for the new
    //# path (using kInitialRtt, as defined in [QUIC-RECOVERY]) is
    //# RECOMMENDED.
    pub fn new(now: Timestamp, retransmit_period: Duration, abandon_after: Duration, data: Data) -> Self {
        let mut retransmit_timer = Timer::default();
        retransmit_timer.set(now);
        let mut abandon_timer = Timer::default();
        abandon_timer.set(now + abandon_after);

        Self::Pending(State {
            data,
            retransmit_timer,
            retransmit_period,
            abandon_timer,
        })
    }

    /// The challenge bytes to put on the wire, if a transmission is due
    pub fn transmission_data(&mut self, now: Timestamp) -> Option<Data> {
        if let Self::Pending(state) = self {
            if state.retransmit_timer.is_expired(now) {
                state
                    .retransmit_timer
                    .set(now + state.retransmit_period);
                return Some(state.data);
            }
        }
        None
    }

    /// Validates a PATH_RESPONSE received on this path
    pub fn is_valid_response(&self, data: &[u8]) -> bool {
        match self {
            Self::Pending(state) => ct::constant_time_eq(&state.data, data),
            _ => false,
        }
    }

    /// Consumes the pending state after a successful response
    pub fn on_validated(&mut self) {
        *self = Self::None;
    }

    pub fn on_timeout(&mut self, now: Timestamp) {
        if let Self::Pending(state) = self {
            if state.abandon_timer.is_expired(now) {
                *self = Self::Abandoned;
            }
        }
    }

    pub fn next_expiration(&self) -> Option<Timestamp> {
        if let Self::Pending(state) = self {
            crate::time::earliest([
                state.retransmit_timer.next_expiration(),
                state.abandon_timer.next_expiration(),
            ])
        } else {
            None
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[inline]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    const DATA: Data = [0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xfe, 0xed];

    fn challenge() -> Challenge {
        Challenge::new(at(100), Duration::from_millis(100), Duration::from_millis(900), DATA)
    }

    #[test]
    fn transmits_then_backs_off() {
        let mut challenge = challenge();
        assert_eq!(challenge.transmission_data(at(100)), Some(DATA));
        // not due again until the retransmit period passes
        assert_eq!(challenge.transmission_data(at(150)), None);
        assert_eq!(challenge.transmission_data(at(200)), Some(DATA));
    }

    #[test]
    fn response_must_match() {
        let challenge = challenge();
        assert!(challenge.is_valid_response(&DATA));
        assert!(!challenge.is_valid_response(&[0; 8]));
        assert!(!challenge.is_valid_response(&DATA[..4]));
    }

    #[test]
    fn abandons_after_deadline() {
        let mut challenge = challenge();
        challenge.on_timeout(at(999));
        assert!(challenge.is_pending());
        challenge.on_timeout(at(1000));
        assert!(challenge.is_abandoned());
        assert!(!challenge.is_valid_response(&DATA));
    }

    #[test]
    fn validation_clears_state() {
        let mut challenge = challenge();
        challenge.on_validated();
        assert_eq!(challenge, Challenge::None);
        assert_eq!(challenge.next_expiration(), None);
    }
}
