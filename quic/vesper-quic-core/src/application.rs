// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Application-level error codes.
//!
//! Applications assign meaning to these 62-bit values; the transport only
//! carries them in RESET_STREAM, STOP_SENDING, and CONNECTION_CLOSE (0x1d).

use crate::varint::VarInt;
use core::fmt;

/// An opaque, application-defined error code
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Error(VarInt);

impl Error {
    /// An `Error` with the value 0, conventionally "no error"
    pub const UNKNOWN: Self = Self(VarInt::ZERO);

    #[inline]
    pub const fn new(code: VarInt) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0.as_u64()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "application error {}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<VarInt> for Error {
    #[inline]
    fn from(code: VarInt) -> Self {
        Self(code)
    }
}

impl From<Error> for VarInt {
    #[inline]
    fn from(error: Error) -> Self {
        error.0
    }
}

impl From<u32> for Error {
    #[inline]
    fn from(code: u32) -> Self {
        Self(VarInt::from_u32(code))
    }
}
