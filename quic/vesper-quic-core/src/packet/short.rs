// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    packet::{key_phase::KeyPhase, number::TruncatedPacketNumber},
};
use vesper_codec::Encoder;

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
//# A 1-RTT packet uses a short packet header.  It is used after the
//# version and 1-RTT keys are negotiated.

/// The fixed bit, always set in packets this crate produces
pub const FIXED_BIT: u8 = 0x40;

/// The latency spin bit; this endpoint does not participate in spinning
pub const SPIN_BIT: u8 = 0x20;

/// The 1-RTT short header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortHeader {
    pub destination_cid: ConnectionId,
    pub key_phase: KeyPhase,
}

impl ShortHeader {
    /// Encodes the header; the destination CID is written without a length
    /// prefix, as its length is negotiated out of band
    pub fn encode_prefix<E: Encoder>(&self, truncated_pn: TruncatedPacketNumber, encoder: &mut E) {
        let tag = FIXED_BIT | self.key_phase.tag_bit() | truncated_pn.len().tag_bits();
        encoder.encode(&tag);
        encoder.write_slice(self.destination_cid.as_bytes());
    }

    /// The number of bytes before the packet number field
    #[inline]
    pub fn pn_offset(&self) -> usize {
        1 + self.destination_cid.len()
    }
}
