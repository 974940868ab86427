// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops::Mul, time::Duration};

/// A transfer rate in bytes per second.
///
/// Rates are computed at microsecond granularity so short sampling
/// intervals don't collapse to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth {
    bytes_per_second: u64,
}

impl Bandwidth {
    pub const ZERO: Self = Self {
        bytes_per_second: 0,
    };

    pub const INFINITY: Self = Self {
        bytes_per_second: u64::MAX,
    };

    #[inline]
    pub const fn new(bytes: u64, interval: Duration) -> Self {
        let micros = interval.as_micros() as u64;
        if micros == 0 {
            Self::INFINITY
        } else {
            // scale to micros first to keep precision on small intervals
            Self {
                bytes_per_second: bytes.saturating_mul(1_000_000) / micros,
            }
        }
    }

    #[inline]
    pub const fn bytes_per_second(self) -> u64 {
        self.bytes_per_second
    }

    /// The time it takes to transmit `bytes` at this rate
    #[inline]
    pub fn transfer_time(self, bytes: u64) -> Duration {
        if self.bytes_per_second == 0 {
            return Duration::MAX;
        }
        let nanos = (bytes as u128 * 1_000_000_000) / self.bytes_per_second as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Scales the rate by `numerator / denominator`
    #[inline]
    pub const fn scale(self, numerator: u64, denominator: u64) -> Self {
        debug_assert!(denominator > 0);
        Self {
            bytes_per_second: self.bytes_per_second / denominator * numerator
                + self.bytes_per_second % denominator * numerator / denominator,
        }
    }
}

/// bandwidth · time = bytes
impl Mul<Duration> for Bandwidth {
    type Output = u64;

    #[inline]
    fn mul(self, duration: Duration) -> u64 {
        let micros = duration.as_micros() as u64;
        (self.bytes_per_second as u128 * micros as u128 / 1_000_000)
            .min(u64::MAX as u128) as u64
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} B/s", self.bytes_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_from_sample() {
        let bw = Bandwidth::new(10_000, Duration::from_millis(100));
        assert_eq!(bw.bytes_per_second(), 100_000);

        // sub-millisecond intervals keep precision
        let bw = Bandwidth::new(150, Duration::from_micros(100));
        assert_eq!(bw.bytes_per_second(), 1_500_000);
    }

    #[test]
    fn bandwidth_delay_product() {
        let bw = Bandwidth::new(1_000_000, Duration::from_secs(1));
        assert_eq!(bw * Duration::from_millis(50), 50_000);
    }

    #[test]
    fn transfer_time_inverts_rate() {
        let bw = Bandwidth::new(1_000_000, Duration::from_secs(1));
        assert_eq!(bw.transfer_time(1_000_000), Duration::from_secs(1));
        assert_eq!(bw.transfer_time(1200), Duration::from_micros(1200));
        assert_eq!(Bandwidth::ZERO.transfer_time(1), Duration::MAX);
    }

    #[test]
    fn scaling() {
        let bw = Bandwidth::new(1000, Duration::from_secs(1));
        assert_eq!(bw.scale(5, 4).bytes_per_second(), 1250);
        assert_eq!(bw.scale(3, 4).bytes_per_second(), 750);
    }
}
