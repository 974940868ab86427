// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The TLS 1.3 engine seam.
//!
//! The engine owns all handshake cryptography and certificate
//! verification; the transport feeds it CRYPTO stream bytes in strict
//! offset order per level and receives back bytes to send, installed
//! secrets, and the peer's transport parameters.

use crate::{
    crypto::{CipherSuite, Secret},
    packet::number::PacketNumberSpace,
    transport,
};
use alloc::vec::Vec;

/// The encryption level of CRYPTO stream data and installed secrets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Initial,
    Handshake,
    OneRtt,
}

impl Level {
    /// The packet number space whose CRYPTO frames carry this level
    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        match self {
            Self::Initial => PacketNumberSpace::Initial,
            Self::Handshake => PacketNumberSpace::Handshake,
            Self::OneRtt => PacketNumberSpace::ApplicationData,
        }
    }

    #[inline]
    pub fn from_space(space: PacketNumberSpace) -> Self {
        match space {
            PacketNumberSpace::Initial => Self::Initial,
            PacketNumberSpace::Handshake => Self::Handshake,
            PacketNumberSpace::ApplicationData => Self::OneRtt,
        }
    }
}

/// A pair of traffic secrets installed by the engine for one level
#[derive(Clone, Debug)]
pub struct Secrets {
    pub suite: CipherSuite,
    pub client: Secret,
    pub server: Secret,
}

/// Everything the engine produced from one feeding
#[derive(Debug, Default)]
pub struct Output {
    /// Handshake bytes to transmit, per level, in order
    pub crypto_data: Vec<(Level, Vec<u8>)>,
    /// Newly installed traffic secrets
    pub secrets: Vec<(Level, Secrets)>,
    /// The TLS handshake finished (client side: Finished sent)
    pub handshake_complete: bool,
    /// The peer's encoded transport parameters, once available
    pub transport_parameters: Option<Vec<u8>>,
    /// The negotiated application protocol, once available
    pub alpn: Option<Vec<u8>>,
    /// A resumption ticket, if the server issued one
    pub session_ticket: Option<Vec<u8>>,
}

impl Output {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.crypto_data.is_empty()
            && self.secrets.is_empty()
            && !self.handshake_complete
            && self.transport_parameters.is_none()
            && self.alpn.is_none()
            && self.session_ticket.is_none()
    }
}

/// An in-progress TLS 1.3 handshake
pub trait Session: 'static + Send {
    /// Starts the handshake; `transport_parameters` is the local encoded
    /// parameter set to carry in the quic_transport_parameters extension
    fn start(&mut self, transport_parameters: &[u8]) -> Result<Output, transport::Error>;

    /// Feeds contiguous CRYPTO stream bytes received at `level`
    fn process_crypto(&mut self, level: Level, data: &[u8]) -> Result<Output, transport::Error>;
}

/// Mints sessions; one exists per client configuration
pub trait Endpoint: 'static + Send {
    type Session: Session;

    fn new_client_session(
        &mut self,
        server_name: &str,
        alpn: &[Vec<u8>],
        resumption_ticket: Option<&[u8]>,
    ) -> Self::Session;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use alloc::collections::VecDeque;

    /// A session driven by a pre-programmed script of outputs.
    ///
    /// `start` pops the first entry; each `process_crypto` pops the next.
    /// Tests assemble scripts that mirror the server flights they inject.
    #[derive(Debug, Default)]
    pub struct ScriptedSession {
        script: VecDeque<Output>,
        pub fed: Vec<(Level, Vec<u8>)>,
    }

    impl ScriptedSession {
        pub fn new(script: impl IntoIterator<Item = Output>) -> Self {
            Self {
                script: script.into_iter().collect(),
                fed: Vec::new(),
            }
        }
    }

    impl Session for ScriptedSession {
        fn start(&mut self, _transport_parameters: &[u8]) -> Result<Output, transport::Error> {
            Ok(self.script.pop_front().unwrap_or_default())
        }

        fn process_crypto(
            &mut self,
            level: Level,
            data: &[u8],
        ) -> Result<Output, transport::Error> {
            self.fed.push((level, data.to_vec()));
            Ok(self.script.pop_front().unwrap_or_default())
        }
    }
}
