// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::crypto::packet_protection;

/// The AEAD nonce length shared by all negotiable suites
pub const NONCE_LEN: usize = 12;

/// The external AEAD seam.
///
/// `seal` and `open` operate in place: the payload slice includes
/// `tag_len` trailing bytes, written by `seal` and verified by `open`.
pub trait Aead: 'static + Send {
    fn seal(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error>;

    fn open(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error>;

    /// Length of the appended authentication tag
    fn tag_len(&self) -> usize;

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
    //# Endpoints MUST count the number of encrypted packets for each set of
    //# keys.
    /// Maximum number of packets this AEAD may protect
    fn confidentiality_limit(&self) -> u64;

    /// Maximum number of failed decryptions this AEAD may observe
    fn integrity_limit(&self) -> u64;
}

/// A packet protection key: the packet-number-aware view over an AEAD.
///
/// This trait is the seam the packet pipeline uses; [`PacketKey`] is the
/// one real implementation, and tests substitute null keys through it.
pub trait Key: Send {
    /// Opens a packet payload in place, returning the plaintext length
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, packet_protection::Error>;

    /// Seals a packet payload in place; the final `tag_len` bytes of
    /// `payload` receive the authentication tag
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error>;

    fn tag_len(&self) -> usize;

    fn confidentiality_limit(&self) -> u64;

    fn integrity_limit(&self) -> u64;
}

/// An AEAD bound to a packet-protection IV
pub struct PacketKey<A: Aead> {
    aead: A,
    iv: [u8; NONCE_LEN],
}

impl<A: Aead> PacketKey<A> {
    #[inline]
    pub fn new(aead: A, iv: [u8; NONCE_LEN]) -> Self {
        Self { aead, iv }
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The nonce, N, is formed by combining the packet protection IV with
    //# the packet number.  The 62 bits of the reconstructed QUIC packet
    //# number in network byte order are left-padded with zeros to the size
    //# of the IV.  The exclusive OR of the padded packet number and the IV
    //# forms the AEAD nonce.
    #[inline]
    fn nonce(&self, packet_number: u64) -> [u8; NONCE_LEN] {
        let mut nonce = self.iv;
        for (nonce_byte, pn_byte) in nonce[NONCE_LEN - 8..]
            .iter_mut()
            .zip(packet_number.to_be_bytes())
        {
            *nonce_byte ^= pn_byte;
        }
        nonce
    }
}

impl<A: Aead> Key for PacketKey<A> {
    #[inline]
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, packet_protection::Error> {
        let plaintext_len = payload
            .len()
            .checked_sub(self.aead.tag_len())
            .ok_or(packet_protection::Error::DECRYPT_ERROR)?;
        self.aead.open(&self.nonce(packet_number), header, payload)?;
        Ok(plaintext_len)
    }

    #[inline]
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error> {
        self.aead.seal(&self.nonce(packet_number), header, payload)
    }

    #[inline]
    fn tag_len(&self) -> usize {
        self.aead.tag_len()
    }

    #[inline]
    fn confidentiality_limit(&self) -> u64 {
        self.aead.confidentiality_limit()
    }

    #[inline]
    fn integrity_limit(&self) -> u64 {
        self.aead.integrity_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing;

    #[test]
    fn nonce_xors_packet_number() {
        let key = PacketKey::new(testing::NullAead::default(), [0xaa; NONCE_LEN]);

        let nonce = key.nonce(0);
        assert_eq!(nonce, [0xaa; NONCE_LEN]);

        let nonce = key.nonce(0x01);
        assert_eq!(nonce[NONCE_LEN - 1], 0xaa ^ 0x01);
        assert_eq!(&nonce[..NONCE_LEN - 8], &[0xaa; 4][..]);

        // distinct packet numbers always produce distinct nonces
        assert_ne!(key.nonce(1), key.nonce(2));
    }
}
