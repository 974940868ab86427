// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{label, CipherSuite, PacketKey, Provider, Secret, NONCE_LEN},
    endpoint,
};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.1
//# Each encryption level has separate secret values for protection of
//# packets sent in each direction.

/// The sealer/opener key pair for one encryption level.
///
/// For a client, the sealer derives from the client secret and the opener
/// from the server secret; a hypothetical server role would swap them.
pub struct KeySet<P: Provider> {
    pub sealer: LevelKeys<P>,
    pub opener: LevelKeys<P>,
}

/// One direction's packet protection material at a level
pub struct LevelKeys<P: Provider> {
    pub key: PacketKey<P::Aead>,
    pub header_key: P::HeaderKey,
}

/// Expands one secret into (AEAD key, IV, header-protection key)
pub fn expand_level_keys<P: Provider>(
    provider: &P,
    suite: CipherSuite,
    secret: &Secret,
) -> LevelKeys<P> {
    let key_len = suite.key_len();

    let key_bytes = provider.hkdf_expand(
        suite,
        secret,
        &label::expand_info(key_len, label::QUIC_KEY),
        key_len,
    );
    let iv_bytes = provider.hkdf_expand(
        suite,
        secret,
        &label::expand_info(NONCE_LEN, label::QUIC_IV),
        NONCE_LEN,
    );
    let hp_bytes = provider.hkdf_expand(
        suite,
        secret,
        &label::expand_info(key_len, label::QUIC_HP),
        key_len,
    );

    let mut iv = [0u8; NONCE_LEN];
    iv.copy_from_slice(&iv_bytes);

    LevelKeys {
        key: PacketKey::new(provider.new_aead(suite, &key_bytes), iv),
        header_key: provider.new_header_key(suite, &hp_bytes),
    }
}

impl<P: Provider> KeySet<P> {
    /// Builds the level's key pair from the TLS-provided secrets
    pub fn new(
        provider: &P,
        suite: CipherSuite,
        local: endpoint::Type,
        client_secret: &Secret,
        server_secret: &Secret,
    ) -> Self {
        let (seal_secret, open_secret) = match local {
            endpoint::Type::Client => (client_secret, server_secret),
            endpoint::Type::Server => (server_secret, client_secret),
        };
        Self {
            sealer: expand_level_keys(provider, suite, seal_secret),
            opener: expand_level_keys(provider, suite, open_secret),
        }
    }

    #[inline]
    pub fn sealer(&self) -> &LevelKeys<P> {
        &self.sealer
    }

    #[inline]
    pub fn opener(&self) -> &LevelKeys<P> {
        &self.opener
    }
}

impl<P: Provider> LevelKeys<P> {
    #[inline]
    pub fn header_key(&self) -> &P::HeaderKey {
        &self.header_key
    }
}

/// Derives the next-generation secret for a key update
//= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
//# secret_<n+1> = HKDF-Expand-Label(secret_<n>, "quic ku",
//#                                  "", Hash.length)
pub fn next_generation_secret<P: Provider>(
    provider: &P,
    suite: CipherSuite,
    secret: &Secret,
) -> Secret {
    let hash_len = suite.hash_len();
    provider
        .hkdf_expand(
            suite,
            secret,
            &label::expand_info(hash_len, label::QUIC_KU),
            hash_len,
        )
        .into()
}
