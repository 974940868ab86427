// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{recovery::Algorithm, varint::VarInt};
use core::{fmt, time::Duration};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# max_idle_timeout (0x01):  The maximum idle timeout is a value in
//#    milliseconds that is encoded as an integer; see (Section 10.1).

/// A rejected limit value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationError(pub(crate) &'static str);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

/// Locally configured connection limits and policy knobs.
///
/// The values feed both the advertised transport parameters and internal
/// queue bounds. Setters validate their argument and return the updated
/// limits, so configuration mistakes fail at build time rather than
/// surfacing as protocol errors mid-connection.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub(crate) max_idle_timeout: Duration,
    pub(crate) max_udp_payload_size: u16,
    pub(crate) initial_max_data: VarInt,
    pub(crate) initial_max_stream_data_bidi_local: VarInt,
    pub(crate) initial_max_stream_data_bidi_remote: VarInt,
    pub(crate) initial_max_stream_data_uni: VarInt,
    pub(crate) initial_max_streams_bidi: VarInt,
    pub(crate) initial_max_streams_uni: VarInt,
    pub(crate) ack_delay_exponent: u8,
    pub(crate) max_ack_delay: Duration,
    pub(crate) active_connection_id_limit: VarInt,
    pub(crate) max_datagram_frame_size: VarInt,
    pub(crate) datagram_send_queue_len: usize,
    pub(crate) datagram_recv_queue_len: usize,
    pub(crate) crypto_buffer_len: usize,
    pub(crate) congestion_algorithm: Algorithm,
    pub(crate) multipath_enabled: bool,
    pub(crate) keep_alive_period: Option<Duration>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            max_udp_payload_size: 1472,
            initial_max_data: VarInt::from_u32(10 * 1024 * 1024),
            initial_max_stream_data_bidi_local: VarInt::from_u32(1024 * 1024),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(1024 * 1024),
            initial_max_stream_data_uni: VarInt::from_u32(1024 * 1024),
            initial_max_streams_bidi: VarInt::from_u32(100),
            initial_max_streams_uni: VarInt::from_u32(100),
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
            active_connection_id_limit: VarInt::from_u8(4),
            max_datagram_frame_size: VarInt::from_u32(65535),
            datagram_send_queue_len: 64,
            datagram_recv_queue_len: 64,
            crypto_buffer_len: 64 * 1024,
            congestion_algorithm: Algorithm::Cubic,
            multipath_enabled: false,
            keep_alive_period: None,
        }
    }
}

macro_rules! limit_accessor {
    ($get:ident, $with:ident, $field:ident, $ty:ty) => {
        #[inline]
        pub fn $get(&self) -> $ty {
            self.$field
        }

        #[inline]
        pub fn $with(mut self, value: $ty) -> Result<Self, ValidationError> {
            self.$field = value;
            Ok(self)
        }
    };
}

impl Limits {
    pub fn new() -> Self {
        Self::default()
    }

    limit_accessor!(max_idle_timeout, with_max_idle_timeout, max_idle_timeout, Duration);
    limit_accessor!(initial_max_data, with_initial_max_data, initial_max_data, VarInt);
    limit_accessor!(
        initial_max_stream_data_bidi_local,
        with_initial_max_stream_data_bidi_local,
        initial_max_stream_data_bidi_local,
        VarInt
    );
    limit_accessor!(
        initial_max_stream_data_bidi_remote,
        with_initial_max_stream_data_bidi_remote,
        initial_max_stream_data_bidi_remote,
        VarInt
    );
    limit_accessor!(
        initial_max_stream_data_uni,
        with_initial_max_stream_data_uni,
        initial_max_stream_data_uni,
        VarInt
    );
    limit_accessor!(congestion_algorithm, with_congestion_algorithm, congestion_algorithm, Algorithm);
    limit_accessor!(multipath_enabled, with_multipath, multipath_enabled, bool);
    limit_accessor!(keep_alive_period, with_keep_alive_period, keep_alive_period, Option<Duration>);

    #[inline]
    pub fn max_udp_payload_size(&self) -> u16 {
        self.max_udp_payload_size
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
    //# Values below 1200 are invalid.
    #[inline]
    pub fn with_max_udp_payload_size(mut self, value: u16) -> Result<Self, ValidationError> {
        if value < 1200 {
            return Err(ValidationError("max_udp_payload_size must be at least 1200"));
        }
        self.max_udp_payload_size = value;
        Ok(self)
    }

    #[inline]
    pub fn initial_max_streams_bidi(&self) -> VarInt {
        self.initial_max_streams_bidi
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
    //# Endpoints MUST NOT exceed the limit set by their peer.  An endpoint
    //# MUST treat receipt of a frame that permits creation of a stream
    //# exceeding this limit as a connection error of type STREAM_LIMIT_ERROR
    #[inline]
    pub fn with_initial_max_streams_bidi(mut self, value: VarInt) -> Result<Self, ValidationError> {
        if value > MAX_STREAMS_LIMIT {
            return Err(ValidationError("stream count limit exceeds 2^60"));
        }
        self.initial_max_streams_bidi = value;
        Ok(self)
    }

    #[inline]
    pub fn initial_max_streams_uni(&self) -> VarInt {
        self.initial_max_streams_uni
    }

    #[inline]
    pub fn with_initial_max_streams_uni(mut self, value: VarInt) -> Result<Self, ValidationError> {
        if value > MAX_STREAMS_LIMIT {
            return Err(ValidationError("stream count limit exceeds 2^60"));
        }
        self.initial_max_streams_uni = value;
        Ok(self)
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
    //# Values of 2^14 or
    //# greater are invalid.
    #[inline]
    pub fn with_max_ack_delay(mut self, value: Duration) -> Result<Self, ValidationError> {
        if value.as_millis() >= 1 << 14 {
            return Err(ValidationError("max_ack_delay must be less than 2^14 ms"));
        }
        self.max_ack_delay = value;
        Ok(self)
    }

    #[inline]
    pub fn ack_delay_exponent(&self) -> u8 {
        self.ack_delay_exponent
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
    //# Values above 20 are invalid.
    #[inline]
    pub fn with_ack_delay_exponent(mut self, value: u8) -> Result<Self, ValidationError> {
        if value > 20 {
            return Err(ValidationError("ack_delay_exponent must be at most 20"));
        }
        self.ack_delay_exponent = value;
        Ok(self)
    }

    #[inline]
    pub fn active_connection_id_limit(&self) -> VarInt {
        self.active_connection_id_limit
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
    //# The value of the active_connection_id_limit parameter MUST be at
    //# least 2.
    #[inline]
    pub fn with_active_connection_id_limit(
        mut self,
        value: VarInt,
    ) -> Result<Self, ValidationError> {
        if value < 2u64 {
            return Err(ValidationError("active_connection_id_limit must be at least 2"));
        }
        self.active_connection_id_limit = value;
        Ok(self)
    }

    #[inline]
    pub fn max_datagram_frame_size(&self) -> VarInt {
        self.max_datagram_frame_size
    }

    /// Setting the size to zero disables datagram receipt entirely
    #[inline]
    pub fn with_max_datagram_frame_size(mut self, value: VarInt) -> Result<Self, ValidationError> {
        self.max_datagram_frame_size = value;
        Ok(self)
    }

    #[inline]
    pub fn datagram_send_queue_len(&self) -> usize {
        self.datagram_send_queue_len
    }

    #[inline]
    pub fn with_datagram_send_queue_len(mut self, value: usize) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError("datagram send queue must hold at least 1"));
        }
        self.datagram_send_queue_len = value;
        Ok(self)
    }

    #[inline]
    pub fn datagram_recv_queue_len(&self) -> usize {
        self.datagram_recv_queue_len
    }

    #[inline]
    pub fn with_datagram_recv_queue_len(mut self, value: usize) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError("datagram recv queue must hold at least 1"));
        }
        self.datagram_recv_queue_len = value;
        Ok(self)
    }

    #[inline]
    pub fn crypto_buffer_len(&self) -> usize {
        self.crypto_buffer_len
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
//# This value cannot exceed 2^60, as it is not possible
//# to encode stream IDs larger than 2^62-1.
const MAX_STREAMS_LIMIT: u64 = 1 << 60;
