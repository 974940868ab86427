// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection event surface.
//!
//! Every externally meaningful transition is published as a typed event:
//! once to any attached [`Subscriber`] (the observability seam), and —
//! for application-facing events — onto the connection's event stream.

use crate::{
    application,
    connection,
    packet::KeyPhase,
    path,
    stream::StreamId,
};

/// Application- and subscriber-visible connection events
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The TLS handshake completed and 1-RTT keys are installed
    ConnectionEstablished {
        negotiated_version: u32,
    },
    /// HANDSHAKE_DONE was received; the handshake is confirmed
    HandshakeConfirmed,
    /// The peer opened a stream
    StreamOpened {
        id: StreamId,
    },
    /// A stream finished in both directions or was reset
    StreamClosed {
        id: StreamId,
    },
    /// A path completed validation
    PathValidated {
        path_id: path::Id,
    },
    /// A PATH_CHALLENGE arrived on a path
    PathChallengeReceived {
        path_id: path::Id,
    },
    /// An unreliable datagram was delivered to the receive queue
    DatagramReceived {
        len: usize,
    },
    /// Datagrams were head-dropped from a full queue
    DatagramDropped {
        count: usize,
    },
    /// The 1-RTT keys advanced a generation
    KeyUpdated {
        phase: KeyPhase,
    },
    /// The connection finished closing
    ConnectionClosed {
        error: connection::Error,
    },
    /// A non-fatal anomaly worth surfacing, e.g. an aborted stream
    StreamReset {
        id: StreamId,
        error: application::Error,
    },
}

/// The observability seam: loggers, metrics recorders, and tests attach
/// here.
pub trait Subscriber: 'static + Send {
    fn on_event(&mut self, event: &Event) {
        let _ = event;
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSubscriber;

impl Subscriber for NoopSubscriber {}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use alloc::vec::Vec;

    /// Records every published event for assertions
    #[derive(Debug, Default)]
    pub struct Collector {
        pub events: Vec<Event>,
    }

    impl Subscriber for Collector {
        fn on_event(&mut self, event: &Event) {
            self.events.push(event.clone());
        }
    }

    impl Collector {
        pub fn count(&self, matcher: impl Fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|event| matcher(event)).count()
        }
    }
}
