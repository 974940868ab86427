// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    packet::{
        number::{PacketNumberSpace, TruncatedPacketNumber},
        version::{QUIC_V1, QUIC_V2},
        Version,
    },
};
use vesper_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# Long headers are used for packets that are sent prior to the
//# establishment of 1-RTT keys.

/// The long header form bit
pub const FORM_BIT: u8 = 0x80;

/// The fixed bit, always set in packets this crate produces
pub const FIXED_BIT: u8 = 0x40;

const TYPE_SHIFT: u8 = 4;
const TYPE_MASK: u8 = 0b11;

/// The packet types carried in long headers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl PacketType {
    //= https://www.rfc-editor.org/rfc/rfc9369#section-3.2
    //# Initial packets use a packet type field of 0b01.  0-RTT packets use
    //# a packet type field of 0b10.  Handshake packets use a packet type
    //# field of 0b11.  Retry packets use a packet type field of 0b00.
    #[inline]
    pub fn from_tag(tag: u8, version: Version) -> Self {
        let bits = (tag >> TYPE_SHIFT) & TYPE_MASK;
        match (version, bits) {
            (QUIC_V2, 0b00) => Self::Retry,
            (QUIC_V2, 0b01) => Self::Initial,
            (QUIC_V2, 0b10) => Self::ZeroRtt,
            (QUIC_V2, _) => Self::Handshake,
            (_, 0b00) => Self::Initial,
            (_, 0b01) => Self::ZeroRtt,
            (_, 0b10) => Self::Handshake,
            (_, _) => Self::Retry,
        }
    }

    #[inline]
    pub fn type_bits(self, version: Version) -> u8 {
        let bits = match (version, self) {
            (QUIC_V2, Self::Retry) => 0b00,
            (QUIC_V2, Self::Initial) => 0b01,
            (QUIC_V2, Self::ZeroRtt) => 0b10,
            (QUIC_V2, Self::Handshake) => 0b11,
            (_, Self::Initial) => 0b00,
            (_, Self::ZeroRtt) => 0b01,
            (_, Self::Handshake) => 0b10,
            (_, Self::Retry) => 0b11,
        };
        bits << TYPE_SHIFT
    }

    /// The packet number space this type belongs to; `Retry` carries none
    #[inline]
    pub fn space(self) -> Option<PacketNumberSpace> {
        match self {
            Self::Initial => Some(PacketNumberSpace::Initial),
            Self::Handshake => Some(PacketNumberSpace::Handshake),
            Self::ZeroRtt => Some(PacketNumberSpace::ApplicationData),
            Self::Retry => None,
        }
    }

    #[inline]
    pub fn has_token(self) -> bool {
        matches!(self, Self::Initial)
    }
}

/// The invariant fields of a long header, through the source connection ID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LongHeader {
    pub packet_type: PacketType,
    pub version: Version,
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
}

impl LongHeader {
    /// Encodes the header through the source CID, leaving the first byte's
    /// packet number length bits for the caller
    pub fn encode_prefix<E: Encoder>(&self, truncated_pn: TruncatedPacketNumber, encoder: &mut E) {
        let tag = FORM_BIT
            | FIXED_BIT
            | self.packet_type.type_bits(self.version)
            | truncated_pn.len().tag_bits();
        encoder.encode(&tag);
        encoder.encode(&self.version);
        self.destination_cid.encode_with_len_prefix(encoder);
        self.source_cid.encode_with_len_prefix(encoder);
    }
}

impl EncoderValue for LongHeader {
    /// Size-estimation encoding with a placeholder packet number length
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&(FORM_BIT | FIXED_BIT));
        encoder.encode(&self.version);
        self.destination_cid.encode_with_len_prefix(encoder);
        self.source_cid.encode_with_len_prefix(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_v2_type_remapping() {
        for packet_type in [
            PacketType::Initial,
            PacketType::ZeroRtt,
            PacketType::Handshake,
            PacketType::Retry,
        ] {
            for version in [QUIC_V1, QUIC_V2] {
                let tag = FORM_BIT | FIXED_BIT | packet_type.type_bits(version);
                assert_eq!(PacketType::from_tag(tag, version), packet_type);
            }
        }

        // the same wire bits mean different types per version
        let tag = FORM_BIT | FIXED_BIT;
        assert_eq!(PacketType::from_tag(tag, QUIC_V1), PacketType::Initial);
        assert_eq!(PacketType::from_tag(tag, QUIC_V2), PacketType::Retry);
    }
}
