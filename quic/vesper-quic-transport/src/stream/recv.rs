// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The receiving half of a stream: reassembly, flow accounting, and
//! reset/stop-sending handling.

use crate::sync::RecvFlowController;
use alloc::vec::Vec;
use vesper_quic_core::{
    application,
    buffer::{reassembler, Reassembler},
    frame,
    stream::{RecvState, StreamId},
    transport,
    varint::VarInt,
};

/// The application-visible outcome of a read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Contiguous bytes; `fin` marks the end of the stream
    Data { data: Vec<u8>, fin: bool },
    /// Nothing available yet; the reader should park
    Blocked,
    /// The peer reset the stream
    Reset(application::Error),
}

#[derive(Debug)]
pub struct RecvStream {
    pub id: StreamId,
    pub state: RecvState,
    pub flow: RecvFlowController,
    reassembler: Reassembler,
    reset_error: Option<application::Error>,
    /// A STOP_SENDING owed to the peer
    stop_sending_pending: Option<application::Error>,
    stop_sending_sent: Option<application::Error>,
}

impl RecvStream {
    pub fn new(id: StreamId, window: VarInt) -> Self {
        Self {
            id,
            state: RecvState::default(),
            flow: RecvFlowController::new(window),
            reassembler: Reassembler::new(),
            reset_error: None,
            stop_sending_pending: None,
            stop_sending_sent: None,
        }
    }

    /// Applies a STREAM frame.
    ///
    /// Returns the number of newly received bytes charged against the
    /// connection-level flow controller.
    pub fn on_stream_frame(&mut self, frame: &frame::Stream) -> Result<u64, transport::Error> {
        if self.state.is_reset() {
            // data after a reset is discarded
            return Ok(0);
        }

        let end = frame
            .end_offset()
            .ok_or_else(|| transport::Error::FRAME_ENCODING_ERROR.with_reason("offset overflow"))?;
        self.flow.on_data_received(end)?;

        let previous_high = self.reassembler.max_received();
        self.reassembler
            .write_at(frame.offset.as_u64(), frame.data, frame.is_fin)
            .map_err(map_buffer_error)?;

        if frame.is_fin {
            self.state.on_size_known()?;
        }
        if self.reassembler.is_complete() {
            self.state.on_all_data_received();
        }

        Ok(self.reassembler.max_received().saturating_sub(previous_high))
    }

    /// Applies a RESET_STREAM frame.
    ///
    /// Returns the newly accounted bytes (the final size may exceed what
    /// was received so far and still consumes connection credit).
    pub fn on_reset_frame(
        &mut self,
        frame: &frame::ResetStream,
    ) -> Result<u64, transport::Error> {
        let final_size = frame.final_size;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# An endpoint MUST treat receipt of a RESET_STREAM frame carrying a
        //# final size lower than the highest received data offset as a
        //# connection error of type FINAL_SIZE_ERROR
        if final_size.as_u64() < self.reassembler.max_received() {
            return Err(transport::Error::FINAL_SIZE_ERROR);
        }
        if let Some(known) = self.reassembler.final_size() {
            if known != final_size.as_u64() {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }
        self.flow.on_data_received(final_size)?;

        let newly_accounted = final_size.as_u64().saturating_sub(self.reassembler.max_received());

        self.state.on_reset()?;
        if self.state.is_reset() {
            self.reset_error = Some(application::Error::new(frame.application_error_code));
        }
        Ok(newly_accounted)
    }

    /// Reads up to `max` contiguous bytes for the application
    pub fn read(&mut self, max: usize) -> ReadOutcome {
        if let Some(error) = self.reset_error {
            self.state.on_reset_read();
            return ReadOutcome::Reset(error);
        }

        match self.reassembler.pop(max) {
            Some(data) => {
                self.flow.on_data_consumed(data.len());
                let fin = self.reassembler.is_consumed();
                if fin {
                    self.state.on_data_read();
                }
                ReadOutcome::Data { data, fin }
            }
            None if self.reassembler.is_consumed() => {
                self.state.on_data_read();
                ReadOutcome::Data {
                    data: Vec::new(),
                    fin: true,
                }
            }
            None => ReadOutcome::Blocked,
        }
    }

    /// The application asks the peer to stop sending
    pub fn stop_sending(&mut self, error: application::Error) {
        if self.state.is_terminal() || self.state.is_reset() {
            return;
        }
        self.stop_sending_pending = Some(error);
    }

    #[inline]
    pub fn has_pending_stop_sending(&self) -> bool {
        self.stop_sending_pending.is_some()
    }

    /// Returns true if a MAX_STREAM_DATA refresh is due
    #[inline]
    pub fn has_credit_update(&self) -> bool {
        !self.state.is_reset()
            && self.reassembler.final_size().is_none()
            && self.flow.has_credit_update()
    }

    /// Takes the STOP_SENDING payload owed to the peer
    pub fn take_pending_stop_sending(&mut self) -> Option<application::Error> {
        let error = self.stop_sending_pending.take()?;
        self.stop_sending_sent = Some(error);
        Some(error)
    }

    /// Re-arms a lost STOP_SENDING
    pub fn on_stop_sending_lost(&mut self) {
        if let Some(error) = self.stop_sending_sent {
            if !self.state.is_reset() && !self.state.is_terminal() {
                self.stop_sending_pending = Some(error);
            }
        }
    }

    /// The MAX_STREAM_DATA update to transmit, if one is due
    pub fn take_credit_update(&mut self) -> Option<VarInt> {
        if self.state.is_reset() || self.reassembler.final_size().is_some() {
            // no further credit is useful once the size is known
            return None;
        }
        self.flow.take_credit_update()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    #[inline]
    pub fn has_readable_data(&self) -> bool {
        self.reset_error.is_some()
            || self.reassembler.contiguous_offset() > self.reassembler.read_offset()
            || self.reassembler.is_consumed()
    }
}

#[inline]
fn map_buffer_error(error: reassembler::Error) -> transport::Error {
    match error {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.2
        //# An endpoint MUST treat the receipt of overlapping stream data
        //# offering different content at the same offset as a connection
        //# error of type PROTOCOL_VIOLATION.
        reassembler::Error::InconsistentData => transport::Error::PROTOCOL_VIOLATION
            .with_reason("overlapping stream data did not match"),
        reassembler::Error::InvalidFinalSize => transport::Error::FINAL_SIZE_ERROR,
        reassembler::Error::OutOfRange => transport::Error::FLOW_CONTROL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_quic_core::{endpoint, stream::StreamType};

    fn stream() -> RecvStream {
        let id = StreamId::initial(endpoint::Type::Server, StreamType::Unidirectional);
        RecvStream::new(id, VarInt::from_u32(10_000))
    }

    fn stream_frame(offset: u64, data: &'static [u8], fin: bool) -> frame::Stream<'static> {
        frame::Stream {
            stream_id: VarInt::ZERO,
            offset: VarInt::new(offset).unwrap(),
            is_fin: fin,
            is_last_frame: false,
            data,
        }
    }

    /// Frames at (0,100), (200,100), (100,100)+fin produce 300 contiguous
    /// bytes followed by fin
    #[test]
    fn out_of_order_delivery() {
        let mut stream = stream();
        stream.on_stream_frame(&stream_frame(0, &[1; 100], false)).unwrap();
        stream.on_stream_frame(&stream_frame(200, &[3; 100], false)).unwrap();
        stream
            .on_stream_frame(&stream_frame(100, &[2; 100], true))
            .unwrap();

        match stream.read(usize::MAX) {
            ReadOutcome::Data { data, fin } => {
                assert_eq!(data.len(), 300);
                assert!(fin);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(stream.is_finished());
    }

    #[test]
    fn connection_credit_accounting_counts_new_bytes_once() {
        let mut stream = stream();
        assert_eq!(
            stream.on_stream_frame(&stream_frame(0, &[0; 100], false)).unwrap(),
            100
        );
        // retransmission of the same bytes consumes nothing
        assert_eq!(
            stream.on_stream_frame(&stream_frame(0, &[0; 100], false)).unwrap(),
            0
        );
        // overlap extending past the high-water mark counts the delta
        assert_eq!(
            stream.on_stream_frame(&stream_frame(50, &[0; 100], false)).unwrap(),
            50
        );
    }

    #[test]
    fn flow_violation_detected() {
        let mut stream = stream();
        let frame = frame::Stream {
            stream_id: VarInt::ZERO,
            offset: VarInt::from_u32(10_000),
            is_fin: false,
            is_last_frame: false,
            data: &[0; 1],
        };
        assert_eq!(
            stream.on_stream_frame(&frame),
            Err(transport::Error::FLOW_CONTROL_ERROR)
        );
    }

    #[test]
    fn reset_surfaces_to_reader() {
        let mut stream = stream();
        stream.on_stream_frame(&stream_frame(0, &[0; 10], false)).unwrap();

        let reset = frame::ResetStream {
            stream_id: VarInt::ZERO,
            application_error_code: VarInt::from_u8(7),
            final_size: VarInt::from_u32(50),
        };
        assert_eq!(stream.on_reset_frame(&reset).unwrap(), 40);

        match stream.read(usize::MAX) {
            ReadOutcome::Reset(error) => assert_eq!(error.as_u64(), 7),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(stream.is_finished());
    }

    #[test]
    fn reset_with_shrinking_final_size_rejected() {
        let mut stream = stream();
        stream.on_stream_frame(&stream_frame(0, &[0; 100], false)).unwrap();

        let reset = frame::ResetStream {
            stream_id: VarInt::ZERO,
            application_error_code: VarInt::ZERO,
            final_size: VarInt::from_u32(50),
        };
        assert_eq!(
            stream.on_reset_frame(&reset),
            Err(transport::Error::FINAL_SIZE_ERROR)
        );
    }

    #[test]
    fn blocked_until_contiguous() {
        let mut stream = stream();
        stream.on_stream_frame(&stream_frame(100, &[0; 10], false)).unwrap();
        assert_eq!(stream.read(usize::MAX), ReadOutcome::Blocked);
        assert!(!stream.has_readable_data());

        stream.on_stream_frame(&stream_frame(0, &[0; 100], false)).unwrap();
        assert!(stream.has_readable_data());
        match stream.read(usize::MAX) {
            ReadOutcome::Data { data, fin } => {
                assert_eq!(data.len(), 110);
                assert!(!fin);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn stop_sending_round_trip() {
        let mut stream = stream();
        stream.stop_sending(application::Error::from(3u32));
        assert_eq!(
            stream.take_pending_stop_sending().unwrap().as_u64(),
            3
        );
        assert!(stream.take_pending_stop_sending().is_none());
        stream.on_stop_sending_lost();
        assert!(stream.take_pending_stop_sending().is_some());
    }
}
