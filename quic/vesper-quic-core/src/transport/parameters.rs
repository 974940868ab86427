// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The quic_transport_parameters extension codec (TLS extension 0x39).

use crate::{
    connection::{limits::Limits, ConnectionId},
    stateless_reset,
    transport::Error,
    varint::VarInt,
};
use alloc::vec::Vec;
use core::time::Duration;
use vesper_codec::{DecoderBuffer, DecoderError, Encoder, EncoderBuffer, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# Those transport parameters that are identified as integers use a
//# variable-length integer encoding; see Section 16.

mod id {
    pub const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
    pub const MAX_IDLE_TIMEOUT: u64 = 0x01;
    pub const STATELESS_RESET_TOKEN: u64 = 0x02;
    pub const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
    pub const INITIAL_MAX_DATA: u64 = 0x04;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
    pub const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
    pub const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
    pub const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
    pub const ACK_DELAY_EXPONENT: u64 = 0x0a;
    pub const MAX_ACK_DELAY: u64 = 0x0b;
    pub const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
    pub const PREFERRED_ADDRESS: u64 = 0x0d;
    pub const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
    pub const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
    pub const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;

    //= https://www.rfc-editor.org/rfc/rfc9221#section-3
    //# max_datagram_frame_size (0x20):  This parameter ... indicates that
    //#    the endpoint supports receiving DATAGRAM frames.
    pub const MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.1
//# Transport parameters with an identifier of the form "31 * N + 27" for
//# integer values of N are reserved to exercise the requirement that
//# unknown transport parameters be ignored.
#[inline]
fn is_reserved(id: u64) -> bool {
    id >= 27 && (id - 27) % 31 == 0
}

/// The preferred address a server offers for post-handshake migration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreferredAddress {
    pub ipv4_address: [u8; 4],
    pub ipv4_port: u16,
    pub ipv6_address: [u8; 16],
    pub ipv6_port: u16,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: stateless_reset::Token,
}

/// A decoded transport parameter set.
///
/// Defaults follow RFC 9000 §18.2 for absent parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    pub max_idle_timeout: VarInt,
    pub stateless_reset_token: Option<stateless_reset::Token>,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    pub max_ack_delay: VarInt,
    pub disable_active_migration: bool,
    pub preferred_address: Option<PreferredAddress>,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    pub max_datagram_frame_size: VarInt,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: VarInt::ZERO,
            stateless_reset_token: None,
            max_udp_payload_size: VarInt::from_u32(65527),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            ack_delay_exponent: 3,
            max_ack_delay: VarInt::from_u8(25),
            disable_active_migration: false,
            preferred_address: None,
            active_connection_id_limit: VarInt::from_u8(2),
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: VarInt::ZERO,
        }
    }
}

impl TransportParameters {
    /// Builds the client's advertised parameter set from its limits
    pub fn from_limits(limits: &Limits, initial_source_connection_id: ConnectionId) -> Self {
        Self {
            max_idle_timeout: VarInt::new(limits.max_idle_timeout().as_millis() as u64)
                .unwrap_or(VarInt::MAX),
            max_udp_payload_size: VarInt::from_u16(limits.max_udp_payload_size()),
            initial_max_data: limits.initial_max_data(),
            initial_max_stream_data_bidi_local: limits.initial_max_stream_data_bidi_local(),
            initial_max_stream_data_bidi_remote: limits.initial_max_stream_data_bidi_remote(),
            initial_max_stream_data_uni: limits.initial_max_stream_data_uni(),
            initial_max_streams_bidi: limits.initial_max_streams_bidi(),
            initial_max_streams_uni: limits.initial_max_streams_uni(),
            ack_delay_exponent: limits.ack_delay_exponent(),
            max_ack_delay: VarInt::new(limits.max_ack_delay().as_millis() as u64)
                .unwrap_or(VarInt::MAX),
            active_connection_id_limit: limits.active_connection_id_limit(),
            initial_source_connection_id: Some(initial_source_connection_id),
            max_datagram_frame_size: limits.max_datagram_frame_size(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn max_idle_timeout(&self) -> Option<Duration> {
        if self.max_idle_timeout == VarInt::ZERO {
            None
        } else {
            Some(Duration::from_millis(self.max_idle_timeout.as_u64()))
        }
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        Duration::from_millis(self.max_ack_delay.as_u64())
    }

    /// Returns true if the peer accepts DATAGRAM frames
    #[inline]
    pub fn datagrams_supported(&self) -> bool {
        self.max_datagram_frame_size > 0u64
    }

    /// Encodes the parameter set for the TLS extension
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let len = self.encoding_size();
        let mut storage = alloc::vec![0u8; len];
        let mut encoder = EncoderBuffer::new(&mut storage);
        self.encode(&mut encoder);
        debug_assert_eq!(encoder.len(), len);
        storage
    }

    /// Decodes and validates a peer parameter set
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut params = Self::default();
        let mut seen = [false; 0x21];
        let mut buffer = DecoderBuffer::new(bytes);

        while !buffer.is_empty() {
            let (param_id, rest) = buffer.decode::<VarInt>().map_err(map_decoder_error)?;
            let (len, rest) = rest.decode::<VarInt>().map_err(map_decoder_error)?;
            let (value, rest) = rest
                .decode_slice(len.as_usize())
                .map_err(map_decoder_error)?;
            buffer = rest;

            let param_id = param_id.as_u64();

            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4
            //# An endpoint MUST NOT send a parameter more than once in a given
            //# transport parameters extension.  An endpoint SHOULD treat
            //# receipt of duplicate transport parameters as a connection error
            //# of type TRANSPORT_PARAMETER_ERROR.
            if let Some(entry) = seen.get_mut(param_id as usize) {
                if core::mem::replace(entry, true) {
                    return Err(Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("duplicate transport parameter"));
                }
            }

            params.decode_one(param_id, value)?;
        }

        params.validate()?;
        Ok(params)
    }

    fn decode_one(&mut self, param_id: u64, value: DecoderBuffer) -> Result<(), Error> {
        macro_rules! varint_param {
            ($field:ident) => {{
                let (decoded, rest) = value.decode::<VarInt>().map_err(map_decoder_error)?;
                rest.ensure_empty().map_err(map_decoder_error)?;
                self.$field = decoded;
            }};
        }
        macro_rules! cid_param {
            ($field:ident) => {{
                let id = ConnectionId::try_from(value.into_less_safe_slice()).map_err(|_| {
                    Error::TRANSPORT_PARAMETER_ERROR.with_reason("connection id too long")
                })?;
                self.$field = Some(id);
            }};
        }

        match param_id {
            id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                cid_param!(original_destination_connection_id)
            }
            id::MAX_IDLE_TIMEOUT => varint_param!(max_idle_timeout),
            id::STATELESS_RESET_TOKEN => {
                let (token, rest) = value
                    .decode::<[u8; stateless_reset::TOKEN_LEN]>()
                    .map_err(map_decoder_error)?;
                rest.ensure_empty().map_err(map_decoder_error)?;
                self.stateless_reset_token = Some(token.into());
            }
            id::MAX_UDP_PAYLOAD_SIZE => varint_param!(max_udp_payload_size),
            id::INITIAL_MAX_DATA => varint_param!(initial_max_data),
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                varint_param!(initial_max_stream_data_bidi_local)
            }
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                varint_param!(initial_max_stream_data_bidi_remote)
            }
            id::INITIAL_MAX_STREAM_DATA_UNI => varint_param!(initial_max_stream_data_uni),
            id::INITIAL_MAX_STREAMS_BIDI => varint_param!(initial_max_streams_bidi),
            id::INITIAL_MAX_STREAMS_UNI => varint_param!(initial_max_streams_uni),
            id::ACK_DELAY_EXPONENT => {
                let (decoded, rest) = value.decode::<VarInt>().map_err(map_decoder_error)?;
                rest.ensure_empty().map_err(map_decoder_error)?;
                self.ack_delay_exponent = decoded.as_u64() as u8;
                if decoded > 20u64 {
                    return Err(Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("ack_delay_exponent exceeds 20"));
                }
            }
            id::MAX_ACK_DELAY => varint_param!(max_ack_delay),
            id::DISABLE_ACTIVE_MIGRATION => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                //# This parameter is a zero-length value.
                value.ensure_empty().map_err(|_| {
                    Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("disable_active_migration carries a value")
                })?;
                self.disable_active_migration = true;
            }
            id::PREFERRED_ADDRESS => {
                let (ipv4_address, rest) = value.decode().map_err(map_decoder_error)?;
                let (ipv4_port, rest) = rest.decode::<u16>().map_err(map_decoder_error)?;
                let (ipv6_address, rest) = rest.decode().map_err(map_decoder_error)?;
                let (ipv6_port, rest) = rest.decode::<u16>().map_err(map_decoder_error)?;
                let (connection_id, rest) =
                    ConnectionId::decode_with_len_prefix(rest).map_err(map_decoder_error)?;
                let (token, rest) = rest
                    .decode::<[u8; stateless_reset::TOKEN_LEN]>()
                    .map_err(map_decoder_error)?;
                rest.ensure_empty().map_err(map_decoder_error)?;
                self.preferred_address = Some(PreferredAddress {
                    ipv4_address,
                    ipv4_port,
                    ipv6_address,
                    ipv6_port,
                    connection_id,
                    stateless_reset_token: token.into(),
                });
            }
            id::ACTIVE_CONNECTION_ID_LIMIT => varint_param!(active_connection_id_limit),
            id::INITIAL_SOURCE_CONNECTION_ID => cid_param!(initial_source_connection_id),
            id::RETRY_SOURCE_CONNECTION_ID => cid_param!(retry_source_connection_id),
            id::MAX_DATAGRAM_FRAME_SIZE => varint_param!(max_datagram_frame_size),
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.2
            //# An endpoint MUST ignore transport parameters that it does
            //# not support.
            unknown => {
                let _ = is_reserved(unknown);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values below 1200 are invalid.
        if self.max_udp_payload_size < 1200u64 {
            return Err(
                Error::TRANSPORT_PARAMETER_ERROR.with_reason("max_udp_payload_size below 1200")
            );
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values of 2^14 or greater are invalid.
        if self.max_ack_delay >= 1u64 << 14 {
            return Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason("max_ack_delay too large"));
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# The value of the active_connection_id_limit parameter MUST be at
        //# least 2.
        if self.active_connection_id_limit < 2u64 {
            return Err(
                Error::TRANSPORT_PARAMETER_ERROR.with_reason("active_connection_id_limit below 2")
            );
        }

        if self.initial_max_streams_bidi > 1u64 << 60
            || self.initial_max_streams_uni > 1u64 << 60
        {
            return Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason("stream limit exceeds 2^60"));
        }

        Ok(())
    }
}

#[inline]
fn map_decoder_error(_: DecoderError) -> Error {
    Error::TRANSPORT_PARAMETER_ERROR.with_reason("malformed transport parameters")
}

fn encode_param<E: Encoder, V: EncoderValue>(encoder: &mut E, param_id: u64, value: &V) {
    encoder.encode(&VarInt::new(param_id).unwrap_or(VarInt::MAX));
    encoder.encode(&VarInt::try_from(value.encoding_size()).unwrap_or(VarInt::MAX));
    encoder.encode(value);
}

impl EncoderValue for TransportParameters {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        macro_rules! nonzero_varint {
            ($id:expr, $field:ident, $default:expr) => {
                if self.$field != $default {
                    encode_param(encoder, $id, &self.$field);
                }
            };
        }

        nonzero_varint!(id::MAX_IDLE_TIMEOUT, max_idle_timeout, VarInt::ZERO);
        nonzero_varint!(
            id::MAX_UDP_PAYLOAD_SIZE,
            max_udp_payload_size,
            VarInt::from_u32(65527)
        );
        nonzero_varint!(id::INITIAL_MAX_DATA, initial_max_data, VarInt::ZERO);
        nonzero_varint!(
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            initial_max_stream_data_bidi_local,
            VarInt::ZERO
        );
        nonzero_varint!(
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            initial_max_stream_data_bidi_remote,
            VarInt::ZERO
        );
        nonzero_varint!(
            id::INITIAL_MAX_STREAM_DATA_UNI,
            initial_max_stream_data_uni,
            VarInt::ZERO
        );
        nonzero_varint!(
            id::INITIAL_MAX_STREAMS_BIDI,
            initial_max_streams_bidi,
            VarInt::ZERO
        );
        nonzero_varint!(
            id::INITIAL_MAX_STREAMS_UNI,
            initial_max_streams_uni,
            VarInt::ZERO
        );

        if self.ack_delay_exponent != 3 {
            encode_param(
                encoder,
                id::ACK_DELAY_EXPONENT,
                &VarInt::from_u8(self.ack_delay_exponent),
            );
        }
        nonzero_varint!(id::MAX_ACK_DELAY, max_ack_delay, VarInt::from_u8(25));

        if self.disable_active_migration {
            encoder.encode(&VarInt::new(id::DISABLE_ACTIVE_MIGRATION).unwrap_or(VarInt::MAX));
            encoder.encode(&VarInt::ZERO);
        }

        nonzero_varint!(
            id::ACTIVE_CONNECTION_ID_LIMIT,
            active_connection_id_limit,
            VarInt::from_u8(2)
        );

        if let Some(cid) = &self.initial_source_connection_id {
            encode_param(encoder, id::INITIAL_SOURCE_CONNECTION_ID, cid);
        }

        nonzero_varint!(
            id::MAX_DATAGRAM_FRAME_SIZE,
            max_datagram_frame_size,
            VarInt::ZERO
        );
    }
}
