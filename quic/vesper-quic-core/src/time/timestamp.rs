// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, num::NonZeroU64, ops, time::Duration};

/// An absolute point in time, opaque to everything but its [`Clock`].
///
/// `Timestamp`s are only meaningfully comparable when they are sourced from
/// the same clock. The internal representation is microseconds since the
/// clock's epoch; the size is consistent across platforms.
///
/// [`Clock`]: crate::time::Clock
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct Timestamp(NonZeroU64);

impl Timestamp {
    /// Creates a `Timestamp` at the given offset from the clock's epoch
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        let micros = duration.as_micros() as u64;
        // the +1 offset keeps the niche available for Option<Timestamp>
        Self(NonZeroU64::new(micros + 1).expect("micros + 1 is nonzero"))
    }

    #[inline]
    fn as_micros(self) -> u64 {
        self.0.get() - 1
    }

    /// Returns the `Duration` elapsed since `earlier`, saturating to zero
    /// if `earlier` is in the future
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.as_micros().saturating_sub(earlier.as_micros()))
    }

    /// Returns true if `self` is at or before `now`
    #[inline]
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }

    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let micros: u64 = duration.as_micros().try_into().ok()?;
        let value = self.as_micros().checked_add(micros)?;
        Some(Self(NonZeroU64::new(value + 1)?))
    }

    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        let micros: u64 = duration.as_micros().try_into().ok()?;
        let value = self.as_micros().checked_sub(micros)?;
        Some(Self(NonZeroU64::new(value + 1)?))
    }
}

impl ops::Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, duration: Duration) -> Self {
        self.checked_add(duration)
            .expect("timestamp overflowed 62-bit microsecond range")
    }
}

impl ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, duration: Duration) {
        *self = *self + duration;
    }
}

impl ops::Sub<Timestamp> for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, earlier: Timestamp) -> Duration {
        self.saturating_duration_since(earlier)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({self})")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let duration = Duration::from_micros(self.as_micros());
        let micros = duration.subsec_micros();
        let secs = duration.as_secs() % 60;
        let mins = duration.as_secs() / 60 % 60;
        let hours = duration.as_secs() / 60 / 60;
        if micros != 0 {
            write!(f, "{hours}:{mins:02}:{secs:02}.{micros:06}")
        } else {
            write!(f, "{hours}:{mins:02}:{secs:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_arithmetic() {
        let base = Timestamp::from_duration(Duration::from_millis(100));
        let later = base + Duration::from_millis(50);

        assert!(later > base);
        assert!(base.has_elapsed(later));
        assert!(!later.has_elapsed(base));
        assert_eq!(later - base, Duration::from_millis(50));
        assert_eq!(base - later, Duration::ZERO);
    }

    #[test]
    fn checked_sub_saturates_at_epoch() {
        let base = Timestamp::from_duration(Duration::from_micros(5));
        assert!(base.checked_sub(Duration::from_micros(10)).is_none());
        assert_eq!(
            base.checked_sub(Duration::from_micros(4)),
            Some(Timestamp::from_duration(Duration::from_micros(1)))
        );
    }
}
