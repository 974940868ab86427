// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::task::Poll;

/// A single-expiration timer owned by an individual component.
///
/// Timers are not registered anywhere; the owning component exposes its
/// earliest deadline through `next_expiration` and the connection driver
/// folds all deadlines into one sleep.
///
/// Note: The timer doesn't implement Copy to ensure it isn't accidentally moved
///       and have the expiration discarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Timestamp>,
}

impl Timer {
    /// Sets the timer to expire at the given timestamp
    #[inline]
    pub fn set(&mut self, time: Timestamp) {
        self.expiration = Some(time);
    }

    /// Cancels the timer.
    /// After cancellation, a timer will no longer report as expired.
    #[inline]
    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    /// Returns true if the timer has expired
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.expiration {
            Some(timeout) => timeout.has_elapsed(now),
            None => false,
        }
    }

    /// Returns true if the timer is armed
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    /// Returns the armed expiration, if any
    #[inline]
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// Notifies the timer of the current time, cancelling it if it expired.
    /// Returns `Ready` exactly once per armed expiration.
    #[inline]
    pub fn poll_expiration(&mut self, now: Timestamp) -> Poll<()> {
        if self.is_expired(now) {
            self.cancel();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Folds a set of component deadlines into the earliest one
#[inline]
pub fn earliest(timers: impl IntoIterator<Item = Option<Timestamp>>) -> Option<Timestamp> {
    timers.into_iter().flatten().min()
}
