// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

pub mod buffer;
pub mod value;

pub use buffer::{DecoderBuffer, DecoderBufferResult};
pub use value::{DecoderParameterizedValue, DecoderValue};

/// The failure modes of decoding untrusted input.
///
/// `UnexpectedEof` and `UnexpectedBytes` carry the number of bytes by which
/// the expectation was violated, which makes truncation reports actionable
/// without formatting allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    UnexpectedEof(usize),
    UnexpectedBytes(usize),
    LengthCapacityExceeded,
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof: {len} bytes"),
            Self::UnexpectedBytes(len) => write!(f, "unexpected bytes: {len} bytes"),
            Self::LengthCapacityExceeded => {
                write!(f, "length could not be represented in platform usize")
            }
            Self::InvariantViolation(message) => write!(f, "{message}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}
