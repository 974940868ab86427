// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Types and utilities around the QUIC Stream identifier

use crate::{endpoint, stream::StreamType, varint::VarInt};

/// The ID of a stream.
///
/// A stream ID is a 62-bit integer (0 to 2^62-1) that is unique for all
/// streams on a connection. The low two bits encode the initiator and the
/// directionality.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct StreamId(VarInt);

impl StreamId {
    #[inline]
    pub const fn from_varint(id: VarInt) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
    //# The two least significant bits from a stream ID therefore identify a
    //# stream as one of four types, as summarized in Table 1.
    //#
    //#        +======+==================================+
    //#        | Bits | Stream Type                      |
    //#        +======+==================================+
    //#        | 0x00 | Client-Initiated, Bidirectional  |
    //#        +------+----------------------------------+
    //#        | 0x01 | Server-Initiated, Bidirectional  |
    //#        +------+----------------------------------+
    //#        | 0x02 | Client-Initiated, Unidirectional |
    //#        +------+----------------------------------+
    //#        | 0x03 | Server-Initiated, Unidirectional |
    //#        +------+----------------------------------+

    /// Returns the initial Stream ID for a given initiator and type
    #[inline]
    pub fn initial(initiator: endpoint::Type, stream_type: StreamType) -> Self {
        match (stream_type, initiator) {
            (StreamType::Bidirectional, endpoint::Type::Client) => Self(VarInt::from_u8(0)),
            (StreamType::Bidirectional, endpoint::Type::Server) => Self(VarInt::from_u8(1)),
            (StreamType::Unidirectional, endpoint::Type::Client) => Self(VarInt::from_u8(2)),
            (StreamType::Unidirectional, endpoint::Type::Server) => Self(VarInt::from_u8(3)),
        }
    }

    /// Returns the n-th Stream ID of the given class, or `None` if it would
    /// exceed the ID space
    #[inline]
    pub fn nth(initiator: endpoint::Type, stream_type: StreamType, n: u64) -> Option<Self> {
        let base = Self::initial(initiator, stream_type).0;
        let offset = n.checked_mul(4)?;
        Some(Self(base.checked_add(VarInt::new(offset).ok()?)?))
    }

    /// The ordinal of this stream within its (initiator, type) class
    #[inline]
    pub fn ordinal(self) -> u64 {
        self.0.as_u64() >> 2
    }

    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        if self.0.as_u64() & 0b01 == 0 {
            endpoint::Type::Client
        } else {
            endpoint::Type::Server
        }
    }

    #[inline]
    pub fn stream_type(self) -> StreamType {
        if self.0.as_u64() & 0b10 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    /// Returns true if the `local` endpoint is allowed to send stream data
    #[inline]
    pub fn is_sendable(self, local: endpoint::Type) -> bool {
        match self.stream_type() {
            StreamType::Bidirectional => true,
            StreamType::Unidirectional => self.initiator() == local,
        }
    }

    /// Returns true if the `local` endpoint can receive stream data
    #[inline]
    pub fn is_receivable(self, local: endpoint::Type) -> bool {
        match self.stream_type() {
            StreamType::Bidirectional => true,
            StreamType::Unidirectional => self.initiator() != local,
        }
    }
}

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl From<StreamId> for u64 {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Type::{Client, Server};

    #[test]
    fn class_encoding() {
        assert_eq!(
            StreamId::initial(Client, StreamType::Bidirectional).as_varint(),
            0u64
        );
        assert_eq!(
            StreamId::initial(Server, StreamType::Bidirectional).as_varint(),
            1u64
        );
        assert_eq!(
            StreamId::initial(Client, StreamType::Unidirectional).as_varint(),
            2u64
        );
        assert_eq!(
            StreamId::initial(Server, StreamType::Unidirectional).as_varint(),
            3u64
        );
    }

    #[test]
    fn nth_spacing() {
        let id = StreamId::nth(Client, StreamType::Bidirectional, 3).unwrap();
        assert_eq!(id.as_varint(), 12u64);
        assert_eq!(id.ordinal(), 3);
        assert_eq!(id.initiator(), Client);
        assert_eq!(id.stream_type(), StreamType::Bidirectional);

        // the id space runs out eventually
        assert!(StreamId::nth(Client, StreamType::Bidirectional, 1 << 62).is_none());
    }

    #[test]
    fn directionality() {
        let uni_server = StreamId::initial(Server, StreamType::Unidirectional);
        assert!(uni_server.is_receivable(Client));
        assert!(!uni_server.is_sendable(Client));

        let uni_client = StreamId::initial(Client, StreamType::Unidirectional);
        assert!(uni_client.is_sendable(Client));
        assert!(!uni_client.is_receivable(Client));

        let bidi = StreamId::initial(Server, StreamType::Bidirectional);
        assert!(bidi.is_sendable(Client) && bidi.is_receivable(Client));
    }
}
