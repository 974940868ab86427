// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flow-control credit accounting, used at both the connection level
//! (MAX_DATA) and per stream (MAX_STREAM_DATA).

use vesper_quic_core::{transport, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
//# A sender MUST ignore any MAX_STREAM_DATA or MAX_DATA frames that
//# do not increase flow control limits.

/// Tracks the credit the peer granted us for sending
#[derive(Clone, Copy, Debug)]
pub struct SendFlowController {
    /// The largest limit the peer advertised
    limit: VarInt,
    /// Bytes already consumed against the limit
    consumed: VarInt,
    /// Set when a send was clipped, until the signal frame goes out
    blocked_signal_pending: bool,
}

impl SendFlowController {
    pub fn new(initial_limit: VarInt) -> Self {
        Self {
            limit: initial_limit,
            consumed: VarInt::ZERO,
            blocked_signal_pending: false,
        }
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    #[inline]
    pub fn consumed(&self) -> VarInt {
        self.consumed
    }

    /// Bytes that may still be sent
    #[inline]
    pub fn available(&self) -> u64 {
        self.limit.as_u64() - self.consumed.as_u64()
    }

    /// Raises the limit from a MAX_DATA / MAX_STREAM_DATA frame
    pub fn on_max_data(&mut self, limit: VarInt) {
        if limit > self.limit {
            self.limit = limit;
            self.blocked_signal_pending = false;
        }
    }

    /// Reserves up to `desired` bytes, clipping to the available credit.
    ///
    /// A clipped reservation records the need for a blocked signal; the
    /// signal is informational and never a precondition for the peer's
    /// next credit update.
    pub fn acquire(&mut self, desired: usize) -> usize {
        let granted = (desired as u64).min(self.available());
        if granted < desired as u64 {
            self.blocked_signal_pending = true;
        }
        self.consumed = self
            .consumed
            .saturating_add(VarInt::new(granted).unwrap_or(VarInt::MAX));
        granted as usize
    }

    #[inline]
    pub fn has_blocked_signal(&self) -> bool {
        self.blocked_signal_pending
    }

    /// Takes the pending blocked signal, carrying the limit to report
    pub fn take_blocked_signal(&mut self) -> Option<VarInt> {
        if core::mem::take(&mut self.blocked_signal_pending) {
            Some(self.limit)
        } else {
            None
        }
    }
}

/// Tracks the credit we grant the peer for receiving
#[derive(Clone, Copy, Debug)]
pub struct RecvFlowController {
    /// The limit currently advertised to the peer
    advertised: VarInt,
    /// The configured window size beyond consumed data
    window: VarInt,
    /// Highest offset the peer has sent (or final size)
    received: VarInt,
    /// Bytes the application has consumed
    consumed: VarInt,
    /// Set when a larger limit should be advertised
    update_pending: bool,
}

impl RecvFlowController {
    pub fn new(window: VarInt) -> Self {
        Self {
            advertised: window,
            window,
            received: VarInt::ZERO,
            consumed: VarInt::ZERO,
            update_pending: false,
        }
    }

    #[inline]
    pub fn advertised(&self) -> VarInt {
        self.advertised
    }

    /// Records data received up to `offset`.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
    //# A receiver MUST close the connection with an error of type
    //# FLOW_CONTROL_ERROR if the sender violates the advertised connection
    //# or stream data limits
    pub fn on_data_received(&mut self, offset: VarInt) -> Result<(), transport::Error> {
        if offset > self.advertised {
            return Err(transport::Error::FLOW_CONTROL_ERROR);
        }
        self.received = self.received.max(offset);
        Ok(())
    }

    /// Records newly received bytes against a cumulative limit, as used
    /// at the connection level where no single offset exists
    pub fn on_data_received_incremental(&mut self, bytes: u64) -> Result<(), transport::Error> {
        let received = self
            .received
            .checked_add(VarInt::new(bytes).map_err(|_| transport::Error::FLOW_CONTROL_ERROR)?)
            .ok_or(transport::Error::FLOW_CONTROL_ERROR)?;
        if received > self.advertised {
            return Err(transport::Error::FLOW_CONTROL_ERROR);
        }
        self.received = received;
        Ok(())
    }

    /// Records `bytes` handed to the application and decides whether to
    /// refresh the peer's credit.
    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.2
    //# A receiver MUST NOT wait
    //# for a STREAM_DATA_BLOCKED or DATA_BLOCKED frame before sending a
    //# MAX_STREAM_DATA or MAX_DATA frame; doing so could result in the
    //# sender being blocked for the rest of the connection.
    pub fn on_data_consumed(&mut self, bytes: usize) {
        self.consumed = self.consumed.saturating_add(
            VarInt::try_from(bytes).unwrap_or(VarInt::MAX),
        );

        // refresh once the peer has burned through half the window
        let target = self.consumed.saturating_add(self.window);
        if target.as_u64() - self.advertised.as_u64() >= self.window.as_u64() / 2 {
            self.update_pending = true;
        }
    }

    #[inline]
    pub fn has_credit_update(&self) -> bool {
        self.update_pending
    }

    /// Takes the new limit to advertise, if a refresh is due
    pub fn take_credit_update(&mut self) -> Option<VarInt> {
        if !core::mem::take(&mut self.update_pending) {
            return None;
        }
        self.advertised = self.consumed.saturating_add(self.window);
        Some(self.advertised)
    }

    /// Re-arms the update flag, e.g. when the frame carrying it was lost
    pub fn retransmit_credit_update(&mut self) {
        self.update_pending = true;
    }
}
