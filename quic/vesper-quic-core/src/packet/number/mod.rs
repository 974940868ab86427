// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet numbers, their wire truncation, and reconstruction.

use crate::varint::VarInt;
use core::{cmp::Ordering, fmt};
use vesper_codec::{DecoderBuffer, DecoderBufferResult, Encoder};


//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# Packet numbers are divided into three spaces in QUIC:
//#
//# Initial space:  All Initial packets (Section 17.2.2) are in this
//#    space.
//#
//# Handshake space:  All Handshake packets (Section 17.2.4) are in this
//#    space.
//#
//# Application data space:  All 0-RTT (Section 17.2.3) and 1-RTT
//#    (Section 17.3) packets are in this space.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

impl PacketNumberSpace {
    #[inline]
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Initial)
    }

    #[inline]
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::Handshake)
    }

    #[inline]
    pub fn is_application_data(self) -> bool {
        matches!(self, Self::ApplicationData)
    }

    /// Tags a raw value with this space
    #[inline]
    pub fn new_packet_number(self, value: VarInt) -> PacketNumber {
        PacketNumber { space: self, value }
    }

    /// Reads the packet number length bits from an unprotected first byte
    #[inline]
    pub fn new_packet_number_len(self, tag: u8) -> PacketNumberLen {
        PacketNumberLen((tag & PACKET_NUMBER_LEN_MASK) + 1)
    }

    /// Iterates the spaces in PTO/discard order
    #[inline]
    pub fn all() -> [Self; 3] {
        [Self::Initial, Self::Handshake, Self::ApplicationData]
    }
}

impl fmt::Display for PacketNumberSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Handshake => write!(f, "handshake"),
            Self::ApplicationData => write!(f, "application"),
        }
    }
}

/// The packet number len is the two least significant bits of the packet tag
pub(crate) const PACKET_NUMBER_LEN_MASK: u8 = 0b11;

/// A packet number tagged with its space.
///
/// Tagging prevents numbers from different spaces from being compared or
/// truncated against each other; such a mix-up is a logic error and trips
/// a debug assertion.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketNumber {
    space: PacketNumberSpace,
    value: VarInt,
}

impl PacketNumber {
    #[inline]
    pub const fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.value.as_u64()
    }

    #[inline]
    pub fn next(self) -> Option<Self> {
        Some(Self {
            space: self.space,
            value: self.value.checked_add(VarInt::from_u8(1))?,
        })
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# The sender MUST use a packet number size able to represent more than
    //# twice as large a range as the difference between the largest
    //# acknowledged packet and the packet number being sent.
    #[inline]
    pub fn truncate(self, largest_acked: Option<PacketNumber>) -> Option<TruncatedPacketNumber> {
        let base = match largest_acked {
            Some(largest) => {
                debug_assert_eq!(self.space, largest.space);
                // the +1 accounts for the implicit -1 starting point
                self.as_u64().checked_sub(largest.as_u64())?
            }
            None => self.as_u64().checked_add(1)?,
        };
        let window = base.checked_mul(2)?;
        let len = PacketNumberLen::for_window(window)?;
        Some(TruncatedPacketNumber {
            len,
            value: (self.as_u64() & len.mask()) as u32,
        })
    }
}

impl PartialOrd for PacketNumber {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PacketNumber {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(self.space, other.space);
        self.value.cmp(&other.value)
    }
}

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.space, self.value)
    }
}

/// The 1-4 byte length class of a wire packet number
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PacketNumberLen(u8);

impl PacketNumberLen {
    pub const MAX: Self = Self(4);

    /// The smallest length whose range covers `window` values
    #[inline]
    fn for_window(window: u64) -> Option<Self> {
        match window {
            0..=0xff => Some(Self(1)),
            0x100..=0xffff => Some(Self(2)),
            0x1_0000..=0xff_ffff => Some(Self(3)),
            0x100_0000..=0xffff_ffff => Some(Self(4)),
            _ => None,
        }
    }

    #[inline]
    pub const fn bytesize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn bitsize(self) -> usize {
        self.0 as usize * 8
    }

    #[inline]
    const fn mask(self) -> u64 {
        (1u64 << self.bitsize()) - 1
    }

    /// The low two bits of the packet tag encoding this length
    #[inline]
    pub const fn tag_bits(self) -> u8 {
        self.0 - 1
    }

    /// Decodes the raw truncated value following the header
    #[inline]
    pub fn decode_truncated_packet_number<'a>(
        self,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, TruncatedPacketNumber> {
        let (slice, buffer) = buffer.decode_slice(self.bytesize())?;
        let mut value = 0u32;
        for byte in slice.into_less_safe_slice() {
            value = (value << 8) | *byte as u32;
        }
        Ok((TruncatedPacketNumber { len: self, value }, buffer))
    }
}

/// A packet number as it appears on the wire, before reconstruction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedPacketNumber {
    len: PacketNumberLen,
    value: u32,
}

impl TruncatedPacketNumber {
    #[cfg(test)]
    pub(crate) fn new(len: PacketNumberLen, value: u32) -> Self {
        Self { len, value }
    }

    #[inline]
    pub const fn len(self) -> PacketNumberLen {
        self.len
    }

    #[inline]
    pub fn encode<E: Encoder>(self, encoder: &mut E) {
        let bytes = self.value.to_be_bytes();
        encoder.write_slice(&bytes[4 - self.len.bytesize()..]);
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //# DecodePacketNumber(largest_pn, truncated_pn, pn_nbits):
    //#    expected_pn  = largest_pn + 1
    //#    pn_win       = 1 << pn_nbits
    //#    pn_hwin      = pn_win / 2
    //#    pn_mask      = pn_win - 1
    //#    // The incoming packet number should be greater than
    //#    // expected_pn - pn_hwin and less than or equal to
    //#    // expected_pn + pn_hwin
    //#    candidate_pn = (expected_pn & ~pn_mask) | truncated_pn
    //#    if candidate_pn <= expected_pn - pn_hwin and
    //#       candidate_pn < (1 << 62) - pn_win:
    //#       return candidate_pn + pn_win
    //#    if candidate_pn > expected_pn + pn_hwin and
    //#       candidate_pn >= pn_win:
    //#       return candidate_pn - pn_win
    //#    return candidate_pn
    pub fn expand(
        self,
        space: PacketNumberSpace,
        largest_processed: Option<PacketNumber>,
    ) -> PacketNumber {
        let expected = largest_processed.map_or(0, |largest| {
            debug_assert_eq!(largest.space(), space);
            largest.as_u64() + 1
        });

        let window = 1u64 << self.len.bitsize();
        let half_window = window / 2;
        let mask = window - 1;

        let mut candidate = (expected & !mask) | self.value as u64;

        if expected
            .checked_sub(half_window)
            .is_some_and(|floor| candidate <= floor)
            && candidate < (1u64 << 62) - window
        {
            candidate += window;
        } else if candidate > expected.saturating_add(half_window) && candidate >= window {
            candidate -= window;
        }

        space.new_packet_number(
            VarInt::new(candidate).unwrap_or(VarInt::MAX),
        )
    }
}
