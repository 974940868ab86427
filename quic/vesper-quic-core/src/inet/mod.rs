// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Network-layer types shared by the socket seam and the path table.

mod ecn;

pub use ecn::{EcnCounts, ExplicitCongestionNotification};

pub use std::net::SocketAddr as SocketAddress;

/// A (local, remote) address pair identifying a network path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressPair {
    pub local: SocketAddress,
    pub remote: SocketAddress,
}

impl AddressPair {
    #[inline]
    pub const fn new(local: SocketAddress, remote: SocketAddress) -> Self {
        Self { local, remote }
    }
}
