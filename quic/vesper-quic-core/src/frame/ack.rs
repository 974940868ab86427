// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{DecoderParameterizedValue, Tag},
    inet::EcnCounts,
    interval_set::{Interval, IntervalSet},
    varint::VarInt,
};
use core::time::Duration;
use smallvec::SmallVec;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.

pub const ACK_TAG: Tag = 0x02;
pub const ACK_WITH_ECN_TAG: Tag = 0x03;

/// Most ACK frames carry a single contiguous range
type Ranges = SmallVec<[Interval; 4]>;

/// An acknowledgment of received packet numbers.
///
/// `ranges` is ordered descending and never empty; the first interval's
/// `end` is the largest acknowledged packet number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub ack_delay: VarInt,
    ranges: Ranges,
    pub ecn_counts: Option<EcnCounts>,
}

impl Ack {
    /// Builds an ACK frame from the receiver's interval set.
    ///
    /// At most `max_ranges` intervals are reported, preferring the most
    /// recently received (largest) packet numbers. Returns `None` when
    /// nothing has been received.
    pub fn from_interval_set(
        set: &IntervalSet,
        ack_delay: VarInt,
        max_ranges: usize,
        ecn_counts: Option<EcnCounts>,
    ) -> Option<Self> {
        debug_assert!(max_ranges >= 1);
        let ranges: Ranges = set.iter_descending().take(max_ranges.max(1)).collect();
        if ranges.is_empty() {
            return None;
        }
        Some(Self {
            ack_delay,
            ranges,
            ecn_counts,
        })
    }

    #[inline]
    pub const fn tag(&self) -> Tag {
        if self.ecn_counts.is_some() {
            ACK_WITH_ECN_TAG
        } else {
            ACK_TAG
        }
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> u64 {
        self.ranges[0].end
    }

    #[inline]
    pub fn smallest_acknowledged(&self) -> u64 {
        self.ranges[self.ranges.len() - 1].start
    }

    /// Iterates acknowledged ranges in descending order
    #[inline]
    pub fn ranges(&self) -> impl Iterator<Item = Interval> + '_ {
        self.ranges.iter().copied()
    }

    #[inline]
    pub fn contains(&self, packet_number: u64) -> bool {
        self.ranges
            .iter()
            .any(|range| range.start <= packet_number && packet_number <= range.end)
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
    //# ACK Delay:  A variable-length integer encoding the acknowledgment
    //#    delay in microseconds; see Section 13.2.5.  It is decoded by
    //#    multiplying the value in the field by 2 to the power of the
    //#    ack_delay_exponent transport parameter sent by the sender of the
    //#    ACK frame.
    #[inline]
    pub fn ack_delay_duration(&self, exponent: u8) -> Duration {
        Duration::from_micros(self.ack_delay.as_u64() << exponent)
    }
}

impl<'a> DecoderParameterizedValue<'a> for Ack {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
        let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
        let (range_count, buffer) = buffer.decode::<VarInt>()?;
        let (first_range, buffer) = buffer.decode::<VarInt>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
        //# If any computed packet number is negative, an endpoint MUST
        //# generate a connection error of type FRAME_ENCODING_ERROR.
        let mut smallest = largest_acknowledged
            .checked_sub(first_range)
            .ok_or(DecoderError::InvariantViolation("negative ack range"))?
            .as_u64();

        let mut ranges = Ranges::new();
        ranges.push(Interval::new(smallest, largest_acknowledged.as_u64()));

        let mut buffer = buffer;
        for _ in 0..range_count.as_u64() {
            let (gap, rest) = buffer.decode::<VarInt>()?;
            let (len, rest) = rest.decode::<VarInt>()?;
            buffer = rest;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# Gap:  A variable-length integer indicating the number of
            //#    contiguous unacknowledged packets preceding the packet number
            //#    one lower than the smallest in the preceding ACK Range.
            let end = smallest
                .checked_sub(gap.as_u64())
                .and_then(|value| value.checked_sub(2))
                .ok_or(DecoderError::InvariantViolation("negative ack range"))?;
            let start = end
                .checked_sub(len.as_u64())
                .ok_or(DecoderError::InvariantViolation("negative ack range"))?;

            ranges.push(Interval::new(start, end));
            smallest = start;
        }

        let (ecn_counts, buffer) = if tag == ACK_WITH_ECN_TAG {
            let (ect_0_count, buffer) = buffer.decode::<VarInt>()?;
            let (ect_1_count, buffer) = buffer.decode::<VarInt>()?;
            let (ce_count, buffer) = buffer.decode::<VarInt>()?;
            (
                Some(EcnCounts {
                    ect_0_count: ect_0_count.as_u64(),
                    ect_1_count: ect_1_count.as_u64(),
                    ce_count: ce_count.as_u64(),
                }),
                buffer,
            )
        } else {
            (None, buffer)
        };

        Ok((
            Self {
                ack_delay,
                ranges,
                ecn_counts,
            },
            buffer,
        ))
    }
}

impl EncoderValue for Ack {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());

        let first = &self.ranges[0];
        encoder.encode(&unchecked_varint(first.end));
        encoder.encode(&self.ack_delay);
        encoder.encode(&unchecked_varint(self.ranges.len() as u64 - 1));
        encoder.encode(&unchecked_varint(first.end - first.start));

        let mut previous_smallest = first.start;
        for range in &self.ranges[1..] {
            debug_assert!(range.end + 2 <= previous_smallest);
            encoder.encode(&unchecked_varint(previous_smallest - range.end - 2));
            encoder.encode(&unchecked_varint(range.end - range.start));
            previous_smallest = range.start;
        }

        if let Some(counts) = &self.ecn_counts {
            encoder.encode(&unchecked_varint(counts.ect_0_count));
            encoder.encode(&unchecked_varint(counts.ect_1_count));
            encoder.encode(&unchecked_varint(counts.ce_count));
        }
    }
}

/// Packet numbers and derived gaps are always below 2^62
#[inline]
fn unchecked_varint(value: u64) -> VarInt {
    debug_assert!(value <= crate::varint::MAX_VARINT_VALUE);
    unsafe { VarInt::new_unchecked(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_codec::EncoderBuffer;

    fn round_trip(ack: &Ack) -> Ack {
        let mut storage = [0u8; 256];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(ack);
            encoder.len()
        };

        let buffer = DecoderBuffer::new(&storage[..len]);
        let (tag, buffer) = buffer.decode::<VarInt>().unwrap();
        let (decoded, buffer) = buffer
            .decode_parameterized::<Ack>(tag.as_u64() as Tag)
            .unwrap();
        assert!(buffer.is_empty());
        decoded
    }

    #[test]
    fn single_range() {
        let set: IntervalSet = [3..=10].into_iter().collect();
        let ack = Ack::from_interval_set(&set, VarInt::from_u8(9), 8, None).unwrap();

        assert_eq!(ack.largest_acknowledged(), 10);
        assert_eq!(ack.smallest_acknowledged(), 3);
        assert_eq!(round_trip(&ack), ack);
    }

    #[test]
    fn multiple_ranges_descending() {
        let set: IntervalSet = [0..=1, 4..=4, 8..=10].into_iter().collect();
        let ack = Ack::from_interval_set(&set, VarInt::ZERO, 8, None).unwrap();

        assert_eq!(ack.largest_acknowledged(), 10);
        assert!(ack.contains(4));
        assert!(!ack.contains(5));
        assert_eq!(round_trip(&ack), ack);
    }

    #[test]
    fn range_cap_prefers_largest() {
        let set: IntervalSet = [0..=1, 4..=4, 8..=10].into_iter().collect();
        let ack = Ack::from_interval_set(&set, VarInt::ZERO, 2, None).unwrap();

        assert_eq!(ack.largest_acknowledged(), 10);
        assert_eq!(ack.smallest_acknowledged(), 4);
        assert!(!ack.contains(0));
    }

    #[test]
    fn ecn_counts_round_trip() {
        let set: IntervalSet = [5..=6].into_iter().collect();
        let counts = EcnCounts {
            ect_0_count: 2,
            ect_1_count: 0,
            ce_count: 1,
        };
        let ack = Ack::from_interval_set(&set, VarInt::ZERO, 8, Some(counts)).unwrap();
        assert_eq!(ack.tag(), ACK_WITH_ECN_TAG);
        assert_eq!(round_trip(&ack), ack);
    }

    #[test]
    fn negative_range_rejected() {
        // largest=1, delay=0, count=0, first_range=5 underflows
        let bytes = [0x01, 0x00, 0x00, 0x05];
        let buffer = DecoderBuffer::new(&bytes);
        assert!(buffer.decode_parameterized::<Ack>(ACK_TAG).is_err());
    }

    #[test]
    fn ack_delay_scaling() {
        let set: IntervalSet = [1..=1].into_iter().collect();
        let ack = Ack::from_interval_set(&set, VarInt::from_u8(100), 8, None).unwrap();
        assert_eq!(ack.ack_delay_duration(3), Duration::from_micros(800));
    }
}
