// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{application, transport};
use core::fmt;

/// The terminal outcome of a connection, as observed by the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The local endpoint closed the connection with a transport error
    Transport(transport::Error),

    /// The peer closed the connection with a transport error code
    PeerTransport(transport::Error),

    /// The connection was closed by an application error code, locally or
    /// by the peer
    Application {
        error: application::Error,
        initiator: crate::endpoint::Type,
    },

    /// The connection timed out without network activity
    IdleTimeout,

    /// A stateless reset was observed from the peer
    StatelessReset,

    /// No path is able to carry packets
    NoValidPath,

    /// The socket reported an unrecoverable failure
    Io(&'static str),

    /// The connection handle was used after the driver terminated
    Detached,
}

impl Error {
    /// Returns the application error code, if the close was
    /// application-signaled
    #[inline]
    pub fn application_error(&self) -> Option<application::Error> {
        match self {
            Self::Application { error, .. } => Some(*error),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Transport(error) => write!(f, "connection closed locally: {error}"),
            Self::PeerTransport(error) => write!(f, "connection closed by peer: {error}"),
            Self::Application { error, initiator } => {
                write!(f, "connection closed by {initiator}: {error}")
            }
            Self::IdleTimeout => write!(f, "connection idle timeout"),
            Self::StatelessReset => write!(f, "stateless reset received"),
            Self::NoValidPath => write!(f, "no path is able to carry packets"),
            Self::Io(reason) => write!(f, "io failure: {reason}"),
            Self::Detached => write!(f, "connection driver has terminated"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    #[inline]
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}
