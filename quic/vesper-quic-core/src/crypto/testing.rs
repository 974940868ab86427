// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Null cryptography for exercising the packet pipeline in tests.
//!
//! The null AEAD copies plaintext through unchanged and appends a zero
//! tag; the null header key derives an all-zero mask. Geometry (tag and
//! sample lengths) matches AES-128-GCM so buffer arithmetic is exercised
//! realistically.

use crate::crypto::{
    header_crypto::{HeaderKey, HeaderProtectionMask},
    key::{Aead, Key, NONCE_LEN},
    packet_protection, CipherSuite, Provider, Secret,
};
use alloc::vec::Vec;

const TAG_LEN: usize = 16;
const SAMPLE_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Default)]
pub struct NullAead {
    fail_on_open: bool,
}

impl Aead for NullAead {
    fn seal(
        &self,
        _nonce: &[u8; NONCE_LEN],
        _aad: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error> {
        let tag_start = payload.len() - TAG_LEN;
        for byte in &mut payload[tag_start..] {
            *byte = 0;
        }
        Ok(())
    }

    fn open(
        &self,
        _nonce: &[u8; NONCE_LEN],
        _aad: &[u8],
        _payload: &mut [u8],
    ) -> Result<(), packet_protection::Error> {
        if self.fail_on_open {
            return Err(packet_protection::Error::DECRYPT_ERROR);
        }
        Ok(())
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
    //# For AEAD_AES_128_GCM ... the confidentiality limit is 2^23 encrypted
    //# packets; see Appendix B.1.
    fn confidentiality_limit(&self) -> u64 {
        1 << 23
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
    //# For AEAD_AES_128_GCM ... the integrity limit is 2^52 invalid
    //# packets; see Appendix B.1.
    fn integrity_limit(&self) -> u64 {
        1 << 52
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullHeaderKey;

impl HeaderKey for NullHeaderKey {
    fn header_protection_mask(&self, _ciphertext_sample: &[u8]) -> HeaderProtectionMask {
        [0; 5]
    }

    fn sample_len(&self) -> usize {
        SAMPLE_LEN
    }
}

/// A null packet key usable wherever a [`Key`] is expected
#[derive(Clone, Copy, Debug, Default)]
pub struct NullKey {
    aead: NullAead,
}

impl NullKey {
    pub fn failing() -> Self {
        Self {
            aead: NullAead { fail_on_open: true },
        }
    }
}

impl Key for NullKey {
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, packet_protection::Error> {
        let _ = (packet_number, header);
        let plaintext_len = payload
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(packet_protection::Error::DECRYPT_ERROR)?;
        self.aead.open(&[0; NONCE_LEN], header, payload)?;
        Ok(plaintext_len)
    }

    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error> {
        let _ = (packet_number, header);
        self.aead.seal(&[0; NONCE_LEN], header, payload)
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn confidentiality_limit(&self) -> u64 {
        self.aead.confidentiality_limit()
    }

    fn integrity_limit(&self) -> u64 {
        self.aead.integrity_limit()
    }
}

/// A provider whose HKDF is a deterministic non-cryptographic mix.
///
/// Key schedule plumbing (labels, phases, retirement) is fully exercised;
/// only the primitives are fake.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProvider;

fn mix(inputs: &[&[u8]], len: usize) -> Vec<u8> {
    let mut state = 0xcbf2_9ce4_8422_2325u64;
    for input in inputs {
        for byte in *input {
            state ^= *byte as u64;
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    (0..len)
        .map(|index| {
            state = state
                .wrapping_add(index as u64)
                .wrapping_mul(0x0000_0100_0000_01b3);
            (state >> 32) as u8
        })
        .collect()
}

impl Provider for NullProvider {
    type Aead = NullAead;
    type HeaderKey = NullHeaderKey;

    fn hkdf_extract(&self, suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Secret {
        mix(&[salt, ikm], suite.hash_len()).into()
    }

    fn hkdf_expand(
        &self,
        _suite: CipherSuite,
        secret: &Secret,
        info: &[u8],
        len: usize,
    ) -> Vec<u8> {
        mix(&[secret.as_bytes(), info], len)
    }

    fn new_aead(&self, _suite: CipherSuite, _key: &[u8]) -> Self::Aead {
        NullAead::default()
    }

    fn new_header_key(&self, _suite: CipherSuite, _key: &[u8]) -> Self::HeaderKey {
        NullHeaderKey
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::initial, packet::version::{QUIC_V1, QUIC_V2}};

    #[test]
    fn derivation_is_deterministic_and_version_scoped() {
        let provider = NullProvider;
        let dcid = [0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x00, 0x08, 0xff];

        let v1_a = initial::derive_initial_secrets(&provider, QUIC_V1, &dcid);
        let v1_b = initial::derive_initial_secrets(&provider, QUIC_V1, &dcid);
        let v2 = initial::derive_initial_secrets(&provider, QUIC_V2, &dcid);

        assert_eq!(v1_a.client.as_bytes(), v1_b.client.as_bytes());
        assert_ne!(v1_a.client.as_bytes(), v2.client.as_bytes());
        assert_ne!(v1_a.client.as_bytes(), v1_a.server.as_bytes());
    }
}
