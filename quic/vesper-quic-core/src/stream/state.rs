// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::transport;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
//# Figure 2 shows the states for the part of a stream that sends data to
//# a peer.

/// Send-direction stream states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendState {
    #[default]
    Ready,
    Send,
    DataSent,
    DataRecvd,
    ResetSent,
    ResetRecvd,
}

impl SendState {
    /// The first STREAM frame moves the stream out of `Ready`
    #[inline]
    pub fn on_send(&mut self) -> Result<(), transport::Error> {
        match self {
            Self::Ready => {
                *self = Self::Send;
                Ok(())
            }
            Self::Send => Ok(()),
            _ => Err(invalid("send on finished or reset stream")),
        }
    }

    /// All data including FIN has been transmitted
    #[inline]
    pub fn on_fin_sent(&mut self) -> Result<(), transport::Error> {
        match self {
            Self::Ready | Self::Send => {
                *self = Self::DataSent;
                Ok(())
            }
            Self::DataSent => Ok(()),
            _ => Err(invalid("fin on reset stream")),
        }
    }

    /// Every byte up to the final size has been acknowledged
    #[inline]
    pub fn on_all_data_acked(&mut self) -> bool {
        if matches!(self, Self::DataSent) {
            *self = Self::DataRecvd;
            true
        } else {
            false
        }
    }

    /// The application reset the stream
    #[inline]
    pub fn on_reset(&mut self) -> Result<(), transport::Error> {
        match self {
            Self::Ready | Self::Send | Self::DataSent => {
                *self = Self::ResetSent;
                Ok(())
            }
            Self::ResetSent | Self::ResetRecvd => Ok(()),
            Self::DataRecvd => Err(invalid("reset after completion")),
        }
    }

    /// The peer acknowledged our RESET_STREAM
    #[inline]
    pub fn on_reset_acked(&mut self) {
        if matches!(self, Self::ResetSent) {
            *self = Self::ResetRecvd;
        }
    }

    /// Terminal states require no further transmissions
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DataRecvd | Self::ResetRecvd)
    }

    #[inline]
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::ResetSent | Self::ResetRecvd)
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
//# Figure 3 shows the states for the part of a stream that receives data
//# from a peer.

/// Receive-direction stream states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecvState {
    #[default]
    Recv,
    SizeKnown,
    DataRecvd,
    DataRead,
    ResetRecvd,
    ResetRead,
}

impl RecvState {
    /// A FIN established the final size
    #[inline]
    pub fn on_size_known(&mut self) -> Result<(), transport::Error> {
        match self {
            Self::Recv => {
                *self = Self::SizeKnown;
                Ok(())
            }
            Self::SizeKnown | Self::DataRecvd | Self::DataRead => Ok(()),
            Self::ResetRecvd | Self::ResetRead => Ok(()),
        }
    }

    /// All bytes up to the final size have arrived
    #[inline]
    pub fn on_all_data_received(&mut self) {
        if matches!(self, Self::SizeKnown) {
            *self = Self::DataRecvd;
        }
    }

    /// The application consumed the complete stream
    #[inline]
    pub fn on_data_read(&mut self) {
        if matches!(self, Self::DataRecvd) {
            *self = Self::DataRead;
        }
    }

    /// A RESET_STREAM frame arrived
    #[inline]
    pub fn on_reset(&mut self) -> Result<(), transport::Error> {
        match self {
            Self::Recv | Self::SizeKnown | Self::DataRecvd => {
                *self = Self::ResetRecvd;
                Ok(())
            }
            Self::ResetRecvd | Self::ResetRead => Ok(()),
            // a reset arriving after the application finished reading is
            // discarded without effect
            Self::DataRead => Ok(()),
        }
    }

    /// The application observed the reset
    #[inline]
    pub fn on_reset_read(&mut self) {
        if matches!(self, Self::ResetRecvd) {
            *self = Self::ResetRead;
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DataRead | Self::ResetRead)
    }

    #[inline]
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::ResetRecvd | Self::ResetRead)
    }
}

#[inline]
fn invalid(reason: &'static str) -> transport::Error {
    transport::Error::STREAM_STATE_ERROR.with_reason(reason)
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for RecvState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
