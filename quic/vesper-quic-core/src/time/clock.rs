// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::time::Duration;

/// A monotonic time source.
///
/// The platform supplies the real clock; tests drive the state machines
/// with a manually advanced one.
pub trait Clock {
    fn get_time(&self) -> Timestamp;
}

/// A clock that always returns the epoch. Only useful where a `Timestamp`
/// is needed but never compared, e.g. constructing test fixtures.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClock;

impl Clock for NoopClock {
    #[inline]
    fn get_time(&self) -> Timestamp {
        Timestamp::from_duration(Duration::from_micros(0))
    }
}

impl<C: Clock> Clock for &C {
    #[inline]
    fn get_time(&self) -> Timestamp {
        (**self).get_time()
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use core::cell::Cell;

    /// A manually advanced clock for deterministic tests
    #[derive(Debug)]
    pub struct ManualClock {
        now: Cell<Timestamp>,
    }

    impl ManualClock {
        pub fn new(start: Duration) -> Self {
            Self {
                now: Cell::new(Timestamp::from_duration(start)),
            }
        }

        pub fn advance(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
        }

        pub fn set(&self, time: Timestamp) {
            self.now.set(time);
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(Duration::from_millis(1))
        }
    }

    impl Clock for ManualClock {
        #[inline]
        fn get_time(&self) -> Timestamp {
            self.now.get()
        }
    }
}
