// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::packet::number::{PacketNumberSpace, TruncatedPacketNumber};
use vesper_codec::{DecoderBuffer, DecoderError};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# The output of this algorithm is a 5-byte mask that is applied to the
//# protected header fields using exclusive OR.

pub const HEADER_PROTECTION_MASK_LEN: usize = 5;
pub type HeaderProtectionMask = [u8; HEADER_PROTECTION_MASK_LEN];

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# in sampling packet ciphertext for header protection, the Packet Number
//# field is assumed to be 4 bytes long
/// Offset of the ciphertext sample relative to the packet number field
pub const SAMPLE_OFFSET: usize = 4;

/// The external header-protection cipher seam
pub trait HeaderKey: 'static + Send {
    /// Derives the protection mask from a ciphertext sample
    fn header_protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask;

    /// The sample size this cipher requires
    fn sample_len(&self) -> usize;
}

const LONG_HEADER_TAG: u8 = 0x80;
pub(crate) const LONG_HEADER_MASK: u8 = 0x0f;
pub(crate) const SHORT_HEADER_MASK: u8 = 0x1f;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# mask = header_protection(hp_key, sample)
//#
//# pn_length = (packet[0] & 0x03) + 1
//# if (packet[0] & 0x80) == 0x80:
//#    # Long header: 4 bits masked
//#    packet[0] ^= mask[0] & 0x0f
//# else:
//#    # Short header: 5 bits masked
//#    packet[0] ^= mask[0] & 0x1f
//#
//# # pn_offset is the start of the Packet Number field.
//# packet[pn_offset:pn_offset+pn_length] ^= mask[1:1+pn_length]

#[inline(always)]
fn first_byte_mask(tag: u8) -> u8 {
    if tag & LONG_HEADER_TAG == LONG_HEADER_TAG {
        LONG_HEADER_MASK
    } else {
        SHORT_HEADER_MASK
    }
}

/// Samples the ciphertext for mask derivation.
///
/// Fails when the packet is too short to contain a sample, which also
/// covers packets too short to be valid at all.
#[inline]
pub fn sample<'a, H: HeaderKey + ?Sized>(
    header_key: &H,
    pn_offset: usize,
    packet: &'a [u8],
) -> Result<&'a [u8], DecoderError> {
    let start = pn_offset + SAMPLE_OFFSET;
    let end = start
        .checked_add(header_key.sample_len())
        .ok_or(DecoderError::LengthCapacityExceeded)?;
    packet
        .get(start..end)
        .ok_or(DecoderError::UnexpectedEof(end))
}

/// Removes header protection in place and decodes the truncated packet
/// number. Returns the packet number and the header length (through the
/// packet number field).
pub fn remove<H: HeaderKey + ?Sized>(
    header_key: &H,
    space: PacketNumberSpace,
    pn_offset: usize,
    packet: &mut [u8],
) -> Result<(TruncatedPacketNumber, usize), DecoderError> {
    let mask = header_key.header_protection_mask(sample(header_key, pn_offset, packet)?);

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    let pn_len = space.new_packet_number_len(packet[0]);

    let header_len = pn_offset + pn_len.bytesize();
    let pn_bytes = packet
        .get_mut(pn_offset..header_len)
        .ok_or(DecoderError::UnexpectedEof(header_len))?;
    for (byte, mask_byte) in pn_bytes.iter_mut().zip(&mask[1..]) {
        *byte ^= mask_byte;
    }

    let (truncated, _) = pn_len.decode_truncated_packet_number(DecoderBuffer::new(pn_bytes))?;
    Ok((truncated, header_len))
}

/// Applies header protection in place after the payload has been sealed
pub fn apply<H: HeaderKey + ?Sized>(
    header_key: &H,
    pn_offset: usize,
    pn_len: usize,
    packet: &mut [u8],
) -> Result<(), DecoderError> {
    let mask = header_key.header_protection_mask(sample(header_key, pn_offset, packet)?);

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    for (byte, mask_byte) in packet[pn_offset..pn_offset + pn_len]
        .iter_mut()
        .zip(&mask[1..])
    {
        *byte ^= mask_byte;
    }
    Ok(())
}
