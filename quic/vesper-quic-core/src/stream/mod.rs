// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream identifiers and per-direction state machines.
//!
//! Buffering and flow accounting live in the transport crate; this module
//! owns the pure-protocol pieces shared by both.

pub mod id;
pub mod state;

pub use id::StreamId;
pub use state::{RecvState, SendState};

/// The directionality of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Bidirectional,
    Unidirectional,
}

impl StreamType {
    #[inline]
    pub fn is_bidirectional(self) -> bool {
        matches!(self, Self::Bidirectional)
    }
}
