// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::ConnectionId, packet::Version};
use smallvec::SmallVec;
use vesper_codec::{DecoderBuffer, DecoderError};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# A Version Negotiation packet is inherently not version specific.
//# Upon receipt by a client, it will be identified as a Version
//# Negotiation packet based on the Version field having a value of 0.

/// A server's list of supported versions.
///
/// Version Negotiation packets are not integrity protected; the client
/// validates the echoed connection IDs before acting on one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionNegotiation {
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    pub supported_versions: SmallVec<[Version; 4]>,
}

impl VersionNegotiation {
    /// Decodes the version list following the connection ID fields
    pub(crate) fn decode_after_cids(
        destination_cid: ConnectionId,
        source_cid: ConnectionId,
        buffer: DecoderBuffer<'_>,
    ) -> Result<Self, DecoderError> {
        let mut supported_versions = SmallVec::new();
        let mut buffer = buffer;
        while !buffer.is_empty() {
            let (version, rest) = buffer.decode::<u32>()?;
            supported_versions.push(version);
            buffer = rest;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
        //# An endpoint MUST ignore a Version Negotiation packet that lists the
        //# QUIC version selected by the client.
        if supported_versions.is_empty() {
            return Err(DecoderError::InvariantViolation(
                "empty version negotiation",
            ));
        }

        Ok(Self {
            destination_cid,
            source_cid,
            supported_versions,
        })
    }

    /// Selects the first mutually supported version
    #[inline]
    pub fn select(&self, current: Version) -> Option<Version> {
        self.supported_versions
            .iter()
            .copied()
            .find(|&version| {
                version != current
                    && crate::packet::version::is_supported(version)
                    && !crate::packet::version::is_reserved_for_negotiation(version)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::version::{QUIC_V1, QUIC_V2};

    #[test]
    fn selection_skips_current_and_reserved() {
        let vn = VersionNegotiation {
            destination_cid: ConnectionId::EMPTY,
            source_cid: ConnectionId::EMPTY,
            supported_versions: [0x0a1a_2a3a, QUIC_V2, QUIC_V1].into_iter().collect(),
        };
        assert_eq!(vn.select(QUIC_V1), Some(QUIC_V2));
        assert_eq!(vn.select(QUIC_V2), Some(QUIC_V1));
    }

    #[test]
    fn no_mutual_version() {
        let vn = VersionNegotiation {
            destination_cid: ConnectionId::EMPTY,
            source_cid: ConnectionId::EMPTY,
            supported_versions: [0xdead_beef].into_iter().collect(),
        };
        assert_eq!(vn.select(QUIC_V1), None);
    }
}
