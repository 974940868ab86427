// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The platform seams: UDP sockets and the async clock.
//!
//! The connection driver is a plain `Future` polling these traits; no
//! executor or reactor dependency leaks into protocol code.

use crate::{
    inet::{AddressPair, ExplicitCongestionNotification, SocketAddress},
    time::{Clock, Timestamp},
};
use core::task::{Context, Poll};

/// A received UDP datagram's metadata
#[derive(Clone, Copy, Debug)]
pub struct RxMeta {
    pub len: usize,
    pub addresses: AddressPair,
    pub ecn: ExplicitCongestionNotification,
}

/// A non-blocking UDP socket bound to one or more local addresses.
///
/// Implementations demultiplex by local connection ID when shared
/// between connections; a dedicated socket passes everything through.
pub trait Socket: 'static + Send {
    /// Receives one datagram into `buffer`
    fn poll_recv(
        &mut self,
        cx: &mut Context<'_>,
        buffer: &mut [u8],
    ) -> Poll<std::io::Result<RxMeta>>;

    /// Sends one datagram from the given local address
    fn poll_send(
        &mut self,
        cx: &mut Context<'_>,
        addresses: &AddressPair,
        ecn: ExplicitCongestionNotification,
        payload: &[u8],
    ) -> Poll<std::io::Result<usize>>;

    /// The default local address for new paths
    fn local_address(&self) -> SocketAddress;
}

/// A clock whose deadline waits integrate with the driver's poll loop
pub trait AsyncClock: Clock + 'static + Send {
    /// Completes once `deadline` has passed. Implementations register
    /// the waker and return `Pending` until then.
    fn poll_at(&mut self, cx: &mut Context<'_>, deadline: Timestamp) -> Poll<()>;
}
