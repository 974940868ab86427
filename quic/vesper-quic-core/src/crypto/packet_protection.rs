// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{header_crypto, key::Key, HeaderKey},
    packet::number::{PacketNumber, PacketNumberSpace},
};
use core::fmt;

/// A packet protection failure.
///
/// Decryption failures on 1-RTT packets after handshake confirmation are
/// expected events (reordering across a key update, stateless resets,
/// garbage) and never close the connection by themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    reason: &'static str,
}

impl Error {
    pub const DECRYPT_ERROR: Self = Self {
        reason: "decrypt error",
    };

    pub const INTERNAL_ERROR: Self = Self {
        reason: "internal error",
    };

    #[inline]
    pub const fn reason(&self) -> &'static str {
        self.reason
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Removes header protection and decrypts a packet payload in place.
///
/// `packet` spans the whole packet (header through AEAD tag); `pn_offset`
/// locates the protected packet number field. On success returns the full
/// packet number and the plaintext payload range start/end within
/// `packet`.
pub fn unprotect_and_decrypt<H: HeaderKey + ?Sized, K: Key + ?Sized>(
    header_key: &H,
    key: &K,
    space: PacketNumberSpace,
    largest_processed: Option<PacketNumber>,
    pn_offset: usize,
    packet: &mut [u8],
) -> Result<(PacketNumber, core::ops::Range<usize>), Error> {
    let (truncated, header_len) =
        header_crypto::remove(header_key, space, pn_offset, packet)
            .map_err(|_| Error::DECRYPT_ERROR)?;
    let packet_number = truncated.expand(space, largest_processed);

    let (header, payload) = packet.split_at_mut(header_len);
    let plaintext_len = key.decrypt(packet_number.as_u64(), header, payload)?;

    Ok((packet_number, header_len..header_len + plaintext_len))
}

/// Encrypts a fully assembled packet in place and applies header
/// protection.
///
/// `packet` holds header, packet number, plaintext payload, and
/// `tag_len` reserved trailing bytes.
pub fn encrypt_and_protect<H: HeaderKey + ?Sized, K: Key + ?Sized>(
    header_key: &H,
    key: &K,
    packet_number: PacketNumber,
    pn_offset: usize,
    pn_len: usize,
    packet: &mut [u8],
) -> Result<(), Error> {
    let header_len = pn_offset + pn_len;
    let (header, payload) = packet.split_at_mut(header_len);
    key.encrypt(packet_number.as_u64(), header, payload)?;

    header_crypto::apply(header_key, pn_offset, pn_len, packet)
        .map_err(|_| Error::INTERNAL_ERROR)
}
