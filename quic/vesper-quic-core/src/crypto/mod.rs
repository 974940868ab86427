// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet protection and the key schedule.
//!
//! Cryptographic primitives (AEAD, HKDF, header-protection ciphers) are
//! external: a [`Provider`] mints them from secrets handed over by the TLS
//! engine. Everything protocol-shaped lives here: salt and label selection,
//! nonce construction, header-protection masking, key update, and usage
//! limits.

pub mod header_crypto;
pub mod initial;
pub mod key;
pub mod key_schedule;
pub mod label;
pub mod one_rtt;
pub mod packet_protection;
pub mod tls;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use header_crypto::{HeaderKey, HeaderProtectionMask, HEADER_PROTECTION_MASK_LEN};
pub use key::{Aead, Key, PacketKey, NONCE_LEN};
pub use key_schedule::KeySet;
pub use one_rtt::OneRttKeys;

use alloc::vec::Vec;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5
//# QUIC packets have varying protections depending on their type.

/// The AEAD cipher suites negotiable for packet protection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    Aes128GcmSha256,
    Aes256GcmSha384,
    ChaCha20Poly1305Sha256,
}

impl CipherSuite {
    #[inline]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128GcmSha256 => 16,
            Self::Aes256GcmSha384 => 32,
            Self::ChaCha20Poly1305Sha256 => 32,
        }
    }

    /// The hash output length, which is also the secret length
    #[inline]
    pub const fn hash_len(self) -> usize {
        match self {
            Self::Aes128GcmSha256 | Self::ChaCha20Poly1305Sha256 => 32,
            Self::Aes256GcmSha384 => 48,
        }
    }
}

/// An expanded TLS secret.
///
/// The Debug impl never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Secret(len={})", self.0.len())
    }
}

impl From<Vec<u8>> for Secret {
    #[inline]
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// The external cryptographic primitive provider.
///
/// Implementations wrap a real crypto library; the protocol core never
/// sees raw primitives, only this seam.
pub trait Provider: 'static + Send {
    type Aead: Aead;
    type HeaderKey: HeaderKey;

    /// HKDF-Extract over the suite's hash function
    fn hkdf_extract(&self, suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Secret;

    /// HKDF-Expand; `info` is a serialized HkdfLabel built by
    /// [`label::expand_info`]
    fn hkdf_expand(&self, suite: CipherSuite, secret: &Secret, info: &[u8], len: usize) -> Vec<u8>;

    /// Instantiates an AEAD from raw key material
    fn new_aead(&self, suite: CipherSuite, key: &[u8]) -> Self::Aead;

    /// Instantiates a header-protection cipher from raw key material
    fn new_header_key(&self, suite: CipherSuite, key: &[u8]) -> Self::HeaderKey;
}
