// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::random;
use core::fmt;
use vesper_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-5.1
//# Each connection possesses a set of connection identifiers, or
//# connection IDs, each of which can identify the connection.
//# Connection IDs are independently selected by endpoints; each endpoint
//# selects the connection IDs that its peer uses.

/// The maximum size of a connection ID in QUIC v1 and v2
pub const MAX_LEN: usize = 20;

/// The length this endpoint uses for locally minted connection IDs
pub const LOCAL_LEN: usize = 8;

#[derive(Clone, Copy, Debug)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "connection id exceeds {MAX_LEN} bytes")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// An opaque connection identifier of 0 to 20 bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; MAX_LEN],
    len: u8,
}

impl ConnectionId {
    /// The zero-length connection ID
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_LEN],
        len: 0,
    };

    /// Mints a random connection ID of the local length
    #[inline]
    pub fn generate<R: random::Generator + ?Sized>(generator: &mut R) -> Self {
        let mut bytes = [0u8; MAX_LEN];
        generator.fill(&mut bytes[..LOCAL_LEN]);
        Self {
            bytes,
            len: LOCAL_LEN as u8,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decodes a connection ID prefixed with a one-byte length
    #[inline]
    pub fn decode_with_len_prefix(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (len, buffer) = buffer.decode::<u8>()?;
        if len as usize > MAX_LEN {
            return Err(DecoderError::InvariantViolation("connection id too long"));
        }
        let (slice, buffer) = buffer.decode_slice(len as usize)?;
        let id = Self::try_from(slice.into_less_safe_slice())
            .map_err(|_| DecoderError::InvariantViolation("connection id too long"))?;
        Ok((id, buffer))
    }

    /// Encodes the connection ID prefixed with a one-byte length
    #[inline]
    pub fn encode_with_len_prefix<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&(self.len() as u8));
        encoder.write_slice(self.as_bytes());
    }
}

impl TryFrom<&[u8]> for ConnectionId {
    type Error = Error;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Error> {
        if slice.len() > MAX_LEN {
            return Err(Error);
        }
        let mut bytes = [0u8; MAX_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }
}

impl AsRef<[u8]> for ConnectionId {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl EncoderValue for ConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self.as_bytes())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{testing::DeterministicGenerator, Generator as _};

    #[test]
    fn bounds() {
        assert!(ConnectionId::try_from(&[0u8; 20][..]).is_ok());
        assert!(ConnectionId::try_from(&[0u8; 21][..]).is_err());
        assert!(ConnectionId::EMPTY.is_empty());
    }

    #[test]
    fn len_prefix_round_trip() {
        let mut generator = DeterministicGenerator::default();
        let id = ConnectionId::generate(&mut generator);

        let mut storage = [0u8; 32];
        let len = {
            let mut encoder = vesper_codec::EncoderBuffer::new(&mut storage);
            id.encode_with_len_prefix(&mut encoder);
            encoder.len()
        };
        assert_eq!(len, 1 + LOCAL_LEN);

        let (decoded, _) =
            ConnectionId::decode_with_len_prefix(DecoderBuffer::new(&storage[..len])).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn distinct_generation() {
        let mut generator = DeterministicGenerator::default();
        let a = ConnectionId::generate(&mut generator);
        let b = ConnectionId::generate(&mut generator);
        assert_ne!(a, b);
        let _ = generator.gen_u64();
    }
}
