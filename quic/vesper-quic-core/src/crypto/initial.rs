// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{label, CipherSuite, Provider, Secret},
    packet::{
        version::{QUIC_V1, QUIC_V2},
        Version,
    },
};
use hex_literal::hex;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a
pub const INITIAL_SALT_V1: [u8; 20] = hex!("38762cf7f55934b34d179ae6a4c80cadccbb7f0a");

// The salt used to derive Initial keys changes for version 2 packets;
// see https://www.rfc-editor.org/rfc/rfc9369#section-3.3
pub const INITIAL_SALT_V2: [u8; 20] = hex!("a707c203a59b47184a1d62ca570406ea7ae3e5d3");

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# Initial packets use AEAD_AES_128_GCM with keys derived from the
//# Destination Connection ID field of the first Initial packet sent by
//# the client.
pub const INITIAL_SUITE: CipherSuite = CipherSuite::Aes128GcmSha256;

/// Selects the Initial salt strictly by the version of the packet being
/// protected.
///
/// When version negotiation switches the connection to a new version, the
/// retried handshake re-derives from the new salt even if the destination
/// connection ID is unchanged.
#[inline]
pub fn initial_salt(version: Version) -> &'static [u8; 20] {
    match version {
        QUIC_V2 => &INITIAL_SALT_V2,
        _ => {
            debug_assert_eq!(version, QUIC_V1);
            &INITIAL_SALT_V1
        }
    }
}

/// The client and server Initial secrets for a destination connection ID
#[derive(Debug)]
pub struct InitialSecrets {
    pub client: Secret,
    pub server: Secret,
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_secret = HKDF-Extract(initial_salt,
//#                               client_dst_connection_id)
//#
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)
//# server_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "server in", "",
//#                                           Hash.length)
pub fn derive_initial_secrets<P: Provider>(
    provider: &P,
    version: Version,
    destination_cid: &[u8],
) -> InitialSecrets {
    let suite = INITIAL_SUITE;
    let hash_len = suite.hash_len();
    let initial_secret = provider.hkdf_extract(suite, initial_salt(version), destination_cid);

    let client = provider
        .hkdf_expand(
            suite,
            &initial_secret,
            &label::expand_info(hash_len, label::CLIENT_IN),
            hash_len,
        )
        .into();
    let server = provider
        .hkdf_expand(
            suite,
            &initial_secret,
            &label::expand_info(hash_len, label::SERVER_IN),
            hash_len,
        )
        .into();

    InitialSecrets { client, server }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_tracks_version() {
        assert_eq!(initial_salt(QUIC_V1), &INITIAL_SALT_V1);
        assert_eq!(initial_salt(QUIC_V2), &INITIAL_SALT_V2);
    }
}
