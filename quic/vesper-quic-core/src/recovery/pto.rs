// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::{Timer, Timestamp};
use core::{task::Poll, time::Duration};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2
//# A Probe Timeout (PTO) triggers the sending of one or two probe
//# datagrams when ack-eliciting packets are not acknowledged within the
//# expected period of time or the server may not have validated the
//# client's address.

/// The PTO timer and its probe-transmission obligation.
///
/// The exponential backoff counter lives with the caller, since it is
/// shared across packet number spaces.
#[derive(Clone, Debug, Default)]
pub struct Pto {
    timer: Timer,
    state: State,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    /// The timer fired; this many probe packets must be transmitted
    RequiresTransmission(u8),
}

impl Pto {
    /// Arms the timer at `base + period`
    #[inline]
    pub fn update(&mut self, base: Timestamp, period: Duration) {
        self.timer.set(base + period);
    }

    #[inline]
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.state = State::Idle;
    }

    #[inline]
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.timer.next_expiration()
    }

    /// Fires the timer if due. On expiry the PTO owes up to two probe
    /// packets.
    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
    //# When a PTO timer expires, a sender MUST send at least one ack-
    //# eliciting packet in the packet number space as a probe.  An
    //# endpoint MAY send up to two full-sized datagrams containing
    //# ack-eliciting packets
    #[inline]
    pub fn on_timeout(&mut self, now: Timestamp) -> Poll<()> {
        if self.timer.poll_expiration(now).is_ready() {
            self.state = State::RequiresTransmission(2);
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// Returns the number of probe packets still owed
    #[inline]
    pub fn transmissions_owed(&self) -> u8 {
        match self.state {
            State::Idle => 0,
            State::RequiresTransmission(count) => count,
        }
    }

    /// Records the transmission of one probe packet
    #[inline]
    pub fn on_transmit(&mut self) {
        self.state = match self.state {
            State::RequiresTransmission(count) if count > 1 => {
                State::RequiresTransmission(count - 1)
            }
            _ => State::Idle,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn expiry_owes_two_probes() {
        let mut pto = Pto::default();
        assert_eq!(pto.transmissions_owed(), 0);

        pto.update(at(100), Duration::from_millis(50));
        assert_eq!(pto.on_timeout(at(149)), Poll::Pending);
        assert_eq!(pto.on_timeout(at(150)), Poll::Ready(()));
        assert_eq!(pto.transmissions_owed(), 2);

        pto.on_transmit();
        assert_eq!(pto.transmissions_owed(), 1);
        pto.on_transmit();
        assert_eq!(pto.transmissions_owed(), 0);
    }

    #[test]
    fn cancel_clears_obligation() {
        let mut pto = Pto::default();
        pto.update(at(0), Duration::from_millis(1));
        let _ = pto.on_timeout(at(10));
        pto.cancel();
        assert_eq!(pto.transmissions_owed(), 0);
        assert_eq!(pto.next_expiration(), None);
    }
}
