// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Splits incoming UDP datagrams into individual packets.
//!
//! Parsing only reads the unprotected header invariants; header protection
//! removal and decryption happen later, against the `bytes` of the
//! returned [`ProtectedPacket`].

use crate::{
    connection::ConnectionId,
    packet::{
        long::{self, LongHeader, PacketType},
        number::PacketNumberSpace,
        version::{self, NEGOTIATION},
        version_negotiation::VersionNegotiation,
        Version,
    },
    varint::VarInt,
};
use alloc::vec::Vec;
use core::ops::Range;
use vesper_codec::{DecoderBuffer, DecoderError};

/// A single packet split out of a datagram
pub enum Packet<'a> {
    /// A Version Negotiation packet (version field of zero)
    VersionNegotiation(VersionNegotiation),

    /// A Retry packet; the token is copied out since Retry carries no
    /// protected payload
    Retry {
        header: LongHeader,
        token: Vec<u8>,
    },

    /// A packet whose payload is still header-protected and encrypted
    Protected(ProtectedPacket<'a>),
}

/// A still-protected packet and the header facts needed to unprotect it
pub struct ProtectedPacket<'a> {
    /// `None` for short-header (1-RTT) packets
    pub packet_type: Option<PacketType>,
    /// `None` for short-header packets, whose version is implicit
    pub version: Option<Version>,
    pub destination_cid: ConnectionId,
    pub source_cid: Option<ConnectionId>,
    /// Initial token location within `bytes`; empty otherwise
    pub token: Range<usize>,
    /// Offset of the (protected) packet number field within `bytes`
    pub pn_offset: usize,
    bytes: &'a mut [u8],
}

impl<'a> ProtectedPacket<'a> {
    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.packet_type
            .and_then(PacketType::space)
            .unwrap_or(PacketNumberSpace::ApplicationData)
    }

    #[inline]
    pub fn is_long_header(&self) -> bool {
        self.packet_type.is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn token_bytes(&self) -> &[u8] {
        &self.bytes[self.token.clone()]
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    #[inline]
    pub fn into_bytes(self) -> &'a mut [u8] {
        self.bytes
    }
}

/// Parses the next packet out of `datagram`, returning the packet and the
/// unconsumed tail (coalesced packets).
pub fn parse(
    datagram: &mut [u8],
    local_cid_len: usize,
) -> Result<(Packet<'_>, &mut [u8]), DecoderError> {
    let total_len = datagram.len();
    let view = DecoderBuffer::new(datagram);
    let tag = view.peek_byte(0)?;

    if tag & long::FORM_BIT == 0 {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
        //# Fixed Bit:  The next bit (0x40) of byte 0 is set to 1.  Packets
        //#    containing a zero value for this bit are not valid packets in
        //#    this version and MUST be discarded.
        if tag & crate::packet::short::FIXED_BIT == 0 {
            return Err(DecoderError::InvariantViolation("fixed bit not set"));
        }

        let pn_offset = 1 + local_cid_len;
        view.ensure_len(pn_offset + 1)?;
        let destination_cid = ConnectionId::try_from(&view.into_less_safe_slice()[1..pn_offset])
            .map_err(|_| DecoderError::InvariantViolation("connection id too long"))?;

        // a short header packet always extends to the end of the datagram
        let (bytes, remaining) = datagram.split_at_mut(total_len);
        let packet = ProtectedPacket {
            packet_type: None,
            version: None,
            destination_cid,
            source_cid: None,
            token: 0..0,
            pn_offset,
            bytes,
        };
        return Ok((Packet::Protected(packet), remaining));
    }

    let buffer = view.skip(1)?;
    let (packet_version, buffer) = buffer.decode::<u32>()?;
    let (destination_cid, buffer) = ConnectionId::decode_with_len_prefix(buffer)?;
    let (source_cid, buffer) = ConnectionId::decode_with_len_prefix(buffer)?;

    if packet_version == NEGOTIATION {
        let vn = VersionNegotiation::decode_after_cids(destination_cid, source_cid, buffer)?;
        let (_, remaining) = datagram.split_at_mut(total_len);
        return Ok((Packet::VersionNegotiation(vn), remaining));
    }

    if !version::is_supported(packet_version) {
        return Err(DecoderError::InvariantViolation("unsupported version"));
    }

    let packet_type = PacketType::from_tag(tag, packet_version);

    if packet_type == PacketType::Retry {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
        //# A Retry packet carries a token and the integrity tag over the
        //# packet.
        let token_with_tag = buffer.into_less_safe_slice();
        if token_with_tag.len() < 16 {
            return Err(DecoderError::UnexpectedEof(16 - token_with_tag.len()));
        }
        let token = token_with_tag[..token_with_tag.len() - 16].to_vec();
        let header = LongHeader {
            packet_type,
            version: packet_version,
            destination_cid,
            source_cid,
        };
        let (_, remaining) = datagram.split_at_mut(total_len);
        return Ok((Packet::Retry { header, token }, remaining));
    }

    let (token, buffer) = if packet_type.has_token() {
        let (token_len, buffer) = buffer.decode::<VarInt>()?;
        let start = total_len - buffer.len();
        let buffer = buffer.skip(token_len.as_usize())?;
        (start..start + token_len.as_usize(), buffer)
    } else {
        (0..0, buffer)
    };

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Length:  The length of the remainder of the packet (that is, the
    //#    Packet Number and Payload fields) in bytes, encoded as a
    //#    variable-length integer (Section 16).
    let (payload_len, buffer) = buffer.decode::<VarInt>()?;
    let pn_offset = total_len - buffer.len();
    buffer.ensure_len(payload_len.as_usize())?;

    let packet_end = pn_offset + payload_len.as_usize();
    let (bytes, remaining) = datagram.split_at_mut(packet_end);

    let packet = ProtectedPacket {
        packet_type: Some(packet_type),
        version: Some(packet_version),
        destination_cid,
        source_cid: Some(source_cid),
        token,
        pn_offset,
        bytes,
    };

    Ok((Packet::Protected(packet), remaining))
}
