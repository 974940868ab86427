// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use core::fmt;
use vesper_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// A connection-fatal protocol error.
///
/// Carried in CONNECTION_CLOSE frames of type 0x1c; the `frame_type`
/// records which frame triggered the error, when known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    /// Creates a new `Error` with the specified code
    pub const fn new(code: VarInt) -> Self {
        Self {
            code,
            frame_type: None,
            reason: "",
        }
    }

    /// Updates the `Error` with the specified `frame_type`
    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: Tag) -> Self {
        self.frame_type = Some(VarInt::from_u8(frame_type));
        self
    }

    /// Updates the `Error` with the specified `reason`
    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
    //# CRYPTO_ERROR (0x0100-0x01ff):  The cryptographic handshake failed.  A
    //#    range of 256 values is reserved for carrying error codes specific
    //#    to the cryptographic handshake that is used.
    #[inline]
    pub fn crypto_error(alert: u8) -> Self {
        Self::new(VarInt::from_u32(0x100 | alert as u32))
    }

    /// Returns the TLS alert if the code lies in the crypto error range
    #[inline]
    pub fn tls_alert(&self) -> Option<u8> {
        let code = self.code.as_u64();
        if (0x100..=0x1ff).contains(&code) {
            Some(code as u8)
        } else {
            None
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "transport error {}", self.code)
        } else {
            f.write_str(self.reason)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Internal convenience macro for defining standard error codes
macro_rules! def_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl Error {
            #[doc = $doc]
            pub const $name: Self = Self::new(VarInt::from_u32($code));
        }
    };
}

def_error!(
    "An endpoint uses this with CONNECTION_CLOSE to signal that the connection is being closed abruptly in the absence of any error.",
    NO_ERROR,
    0x0
);
def_error!(
    "The endpoint encountered an internal error and cannot continue with the connection.",
    INTERNAL_ERROR,
    0x1
);
def_error!(
    "The server refused to accept a new connection.",
    CONNECTION_REFUSED,
    0x2
);
def_error!(
    "An endpoint received more data than it permitted in its advertised data limits.",
    FLOW_CONTROL_ERROR,
    0x3
);
def_error!(
    "An endpoint received a frame for a stream identifier that exceeded its advertised stream limit for the corresponding stream type.",
    STREAM_LIMIT_ERROR,
    0x4
);
def_error!(
    "An endpoint received a frame for a stream that was not in a state that permitted that frame.",
    STREAM_STATE_ERROR,
    0x5
);
def_error!(
    "An endpoint received a STREAM or RESET_STREAM frame that contradicts an established final size.",
    FINAL_SIZE_ERROR,
    0x6
);
def_error!(
    "An endpoint received a frame that was badly formatted.",
    FRAME_ENCODING_ERROR,
    0x7
);
def_error!(
    "An endpoint received transport parameters that were badly formatted, invalid, absent, or forbidden.",
    TRANSPORT_PARAMETER_ERROR,
    0x8
);
def_error!(
    "An endpoint received more connection IDs than its advertised active_connection_id_limit.",
    CONNECTION_ID_LIMIT_ERROR,
    0x9
);
def_error!(
    "An endpoint detected an error with protocol compliance that was not covered by more specific error codes.",
    PROTOCOL_VIOLATION,
    0xA
);
def_error!(
    "A server received a client Initial that contained an invalid Token field.",
    INVALID_TOKEN,
    0xB
);
def_error!(
    "The application or application protocol caused the connection to be closed.",
    APPLICATION_ERROR,
    0xC
);
def_error!(
    "An endpoint has received more data in CRYPTO frames than it can buffer.",
    CRYPTO_BUFFER_EXCEEDED,
    0xD
);
def_error!(
    "An endpoint detected errors in performing key updates.",
    KEY_UPDATE_ERROR,
    0xE
);
def_error!(
    "An endpoint has reached the confidentiality or integrity limit for the AEAD algorithm.",
    AEAD_LIMIT_REACHED,
    0xF
);
def_error!(
    "An endpoint has determined that the network path is incapable of supporting QUIC.",
    NO_VIABLE_PATH,
    0x10
);

impl From<DecoderError> for Error {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::InvariantViolation(reason) => {
                Self::PROTOCOL_VIOLATION.with_reason(reason)
            }
            _ => Self::FRAME_ENCODING_ERROR.with_reason("malformed encoding"),
        }
    }
}

impl From<crate::varint::VarIntError> for Error {
    fn from(_: crate::varint::VarIntError) -> Self {
        Self::INTERNAL_ERROR.with_reason("varint range exceeded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_error_range() {
        let error = Error::crypto_error(42);
        assert_eq!(error.code.as_u64(), 0x100 + 42);
        assert_eq!(error.tls_alert(), Some(42));
        assert_eq!(Error::PROTOCOL_VIOLATION.tls_alert(), None);
    }

    #[test]
    fn decoder_errors_map_to_frame_encoding() {
        let error: Error = DecoderError::UnexpectedEof(3).into();
        assert_eq!(error.code, Error::FRAME_ENCODING_ERROR.code);

        let error: Error = DecoderError::InvariantViolation("bad ack range").into();
        assert_eq!(error.code, Error::PROTOCOL_VIOLATION.code);
    }
}
